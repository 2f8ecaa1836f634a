use crate::{deployment::Summary, Error};
use don_registry::Snapshot;
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use std::sync::{Arc, Mutex, PoisonError};

/// Latest snapshot pushed to the [Actor](super::Actor), shared with every [Mailbox].
pub(super) type Latest = Arc<Mutex<Option<Arc<Snapshot>>>>;

/// Message types that can be sent to the [Mailbox].
pub enum Message {
    /// Request a summary of every tracked deployment.
    Status {
        responder: oneshot::Sender<Vec<Summary>>,
    },

    /// Stop the actor and close every tracked deployment.
    ///
    /// The responder is sent the combined result of closing the deployments.
    Close {
        responder: oneshot::Sender<Result<(), Error>>,
    },
}

/// Ingress mailbox for the [Actor](super::Actor).
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
    latest: Latest,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>, latest: Latest) -> Self {
        Self { sender, latest }
    }

    /// Store the latest registry snapshot.
    ///
    /// Returns immediately. The snapshot is diffed on the next tick, replacing any snapshot
    /// stored since the previous tick.
    pub fn launch(&self, snapshot: Snapshot) -> Result<(), Error> {
        if self.sender.is_closed() {
            return Err(Error::Closed);
        }
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        *latest = Some(Arc::new(snapshot));
        Ok(())
    }

    /// Summarize every tracked deployment.
    pub async fn status(&mut self) -> Result<Vec<Summary>, Error> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(Message::Status { responder })
            .await
            .map_err(|_| Error::Closed)?;
        receiver.await.map_err(|_| Error::Closed)
    }

    /// Stop the actor, waiting for every tracked deployment to be closed.
    ///
    /// Returns `Ok(())` if the actor has already stopped.
    pub async fn close(&mut self) -> Result<(), Error> {
        let (responder, receiver) = oneshot::channel();
        let sent = self.sender.send(Message::Close { responder }).await;
        if sent.is_err() {
            return Ok(());
        }
        receiver.await.unwrap_or(Ok(()))
    }
}
