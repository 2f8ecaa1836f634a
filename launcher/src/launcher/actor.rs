use super::{
    ingress::{Latest, Mailbox, Message},
    metrics::{self, Outcome},
    tracker::Tracker,
    Config,
};
use crate::{Factory, Supplier};
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use don_registry::{diff, CapabilityId};
use futures::{channel::mpsc, StreamExt};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime},
};
use tracing::{debug, error, trace, warn};

/// Keeps the deployments of every relevant DON consistent with the latest registry snapshot.
///
/// The actor exclusively owns the tracked deployments. Snapshots are pushed through the
/// [Mailbox] and diffed against the applied registry state once per tick.
pub struct Actor<E: Clock + Spawner + Metrics, S: Supplier, F: Factory> {
    context: E,

    capability: CapabilityId,
    tick_interval: Duration,

    supplier: S,
    tracker: Tracker<F>,

    latest: Latest,
    mailbox: mpsc::Receiver<Message>,

    metrics: metrics::Metrics,
}

impl<E: Clock + Spawner + Metrics, S: Supplier, F: Factory> Actor<E, S, F> {
    /// Create a new actor with the given context and configuration.
    ///
    /// Returns the actor and a mailbox for sending messages to it.
    pub fn new(context: E, cfg: Config<S, F>) -> (Self, Mailbox) {
        assert!(
            !cfg.tick_interval.is_zero(),
            "tick interval must be non-zero"
        );
        assert!(cfg.mailbox_size > 0, "mailbox size must be non-zero");

        let (sender, receiver) = mpsc::channel(cfg.mailbox_size);
        let latest = Arc::new(Mutex::new(None));
        let mailbox = Mailbox::new(sender, latest.clone());
        let metrics = metrics::Metrics::init(context.clone());
        let tracker = Tracker::new(cfg.peer, cfg.factory, metrics.clone());

        (
            Self {
                context,
                capability: cfg.capability,
                tick_interval: cfg.tick_interval,
                supplier: cfg.supplier,
                tracker,
                latest,
                mailbox: receiver,
                metrics,
            },
            mailbox,
        )
    }

    /// Start the actor.
    ///
    /// The first tick happens one interval after the actor starts.
    pub fn start(mut self) -> Handle<()> {
        self.context.spawn_ref()(self.run())
    }

    async fn run(mut self) {
        let mut shutdown = self.context.stopped();
        let mut deadline = self.context.current() + self.tick_interval;
        let mut closer = None;
        loop {
            select! {
                _ = &mut shutdown => {
                    debug!("shutdown");
                    break;
                },
                _ = self.context.sleep_until(deadline) => {
                    self.tick().await;
                    deadline = next_deadline(deadline, self.context.current(), self.tick_interval);
                },
                mail = self.mailbox.next() => {
                    let Some(msg) = mail else {
                        debug!("mailbox closed");
                        break;
                    };
                    match msg {
                        Message::Status { responder } => {
                            trace!("mailbox: status");
                            let _ = responder.send(self.tracker.summary());
                        }
                        Message::Close { responder } => {
                            trace!("mailbox: close");
                            closer = Some(responder);
                            break;
                        }
                    }
                },
            }
        }

        // Close every deployment only once no more ticks can run
        let result = self.tracker.close().await;
        if let Err(err) = &result {
            error!(?err, "failed to close deployments");
        }
        if let Some(closer) = closer {
            let _ = closer.send(result);
        }
    }

    async fn tick(&mut self) {
        if let Err(err) = self.supplier.ready() {
            debug!(?err, "supplier not ready, skipping tick");
            self.metrics.tick(Outcome::Skipped);
            return;
        }
        let latest = self
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(latest) = latest else {
            debug!("no snapshot, skipping tick");
            self.metrics.tick(Outcome::Skipped);
            return;
        };

        let diff = match diff(&self.capability, self.tracker.applied(), &latest) {
            Ok(diff) => diff,
            Err(err) => {
                error!(?err, capability = %self.capability, "failed to diff snapshot");
                self.metrics.tick(Outcome::Failed);
                return;
            }
        };
        if diff.is_empty() {
            trace!("no changes");
            self.metrics.tick(Outcome::Applied);
            return;
        }
        debug!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            updated = diff.updated.len(),
            "applying diff"
        );
        match self.tracker.process(&mut self.supplier, diff).await {
            Ok(()) => self.metrics.tick(Outcome::Applied),
            Err(err) => {
                warn!(?err, "failed to apply diff");
                self.metrics.tick(Outcome::Failed);
            }
        }
    }
}

/// Returns the first deadline on the fixed schedule that is later than `now`.
fn next_deadline(deadline: SystemTime, now: SystemTime, interval: Duration) -> SystemTime {
    let mut next = deadline + interval;
    while next <= now {
        next += interval;
    }
    next
}
