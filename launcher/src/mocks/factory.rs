use super::Error;
use crate::{Digest, OcrConfigWithMeta, PluginType, Role};
use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex},
};

/// An event observed by the [Factory].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// An oracle was constructed.
    Created {
        id: u64,
        role: Role,
        plugin: PluginType,
        digest: Digest,
    },
    /// An attempt was made to start an oracle.
    Started { id: u64 },
    /// An attempt was made to close an oracle.
    Closed { id: u64 },
}

/// Lifecycle of an [Oracle] as recorded by the [Factory].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Created,
    Running,
    Closed,
}

#[derive(Default)]
struct Inner {
    next: u64,
    events: Vec<Event>,
    oracles: BTreeMap<u64, (Role, Digest, Status)>,

    fail_create: HashSet<Digest>,
    fail_start: HashSet<(Role, Digest)>,
    fail_close: HashSet<(Role, Digest)>,
}

/// A [crate::Factory] that records every oracle it constructs and every call made on them.
///
/// Clones share the same record, so a test can keep a clone after handing the factory to the
/// launcher.
#[derive(Clone, Default)]
pub struct Factory {
    inner: Arc<Mutex<Inner>>,
}

impl Factory {
    fn create(&self, role: Role, plugin: PluginType, digest: Digest) -> Result<Oracle, Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_create.contains(&digest) {
            return Err(Error::Create);
        }
        let id = inner.next;
        inner.next += 1;
        inner.oracles.insert(id, (role, digest, Status::Created));
        inner.events.push(Event::Created {
            id,
            role,
            plugin,
            digest,
        });
        Ok(Oracle {
            id,
            role,
            digest,
            inner: self.inner.clone(),
        })
    }

    /// Fail the construction of any oracle serving `digest`.
    pub fn fail_create(&self, digest: Digest) {
        self.inner.lock().unwrap().fail_create.insert(digest);
    }

    /// Fail any attempt to start an oracle of `role` serving `digest`.
    pub fn fail_start(&self, role: Role, digest: Digest) {
        self.inner.lock().unwrap().fail_start.insert((role, digest));
    }

    /// Fail any attempt to close an oracle of `role` serving `digest`.
    pub fn fail_close(&self, role: Role, digest: Digest) {
        self.inner.lock().unwrap().fail_close.insert((role, digest));
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_create.clear();
        inner.fail_start.clear();
        inner.fail_close.clear();
    }

    /// All recorded events, in order.
    pub fn events(&self) -> Vec<Event> {
        self.inner.lock().unwrap().events.clone()
    }

    /// All constructed oracles, in order of construction.
    pub fn created(&self) -> Vec<(u64, Role, Digest)> {
        self.inner
            .lock()
            .unwrap()
            .oracles
            .iter()
            .map(|(id, (role, digest, _))| (*id, *role, *digest))
            .collect()
    }

    /// The most recently constructed oracle of `role` serving `digest`.
    pub fn oracle(&self, role: Role, digest: Digest) -> Option<u64> {
        self.inner
            .lock()
            .unwrap()
            .oracles
            .iter()
            .rev()
            .find(|(_, (r, d, _))| *r == role && *d == digest)
            .map(|(id, _)| *id)
    }

    /// Current status of an oracle.
    pub fn status(&self, id: u64) -> Option<Status> {
        self.inner
            .lock()
            .unwrap()
            .oracles
            .get(&id)
            .map(|(_, _, status)| *status)
    }

    /// Oracles currently running, as `(role, digest)` pairs.
    pub fn running(&self) -> Vec<(Role, Digest)> {
        self.inner
            .lock()
            .unwrap()
            .oracles
            .values()
            .filter(|(_, _, status)| *status == Status::Running)
            .map(|(role, digest, _)| (*role, *digest))
            .collect()
    }

    /// Number of start attempts made on an oracle.
    pub fn starts(&self, id: u64) -> usize {
        self.events()
            .iter()
            .filter(|event| **event == Event::Started { id })
            .count()
    }

    /// Number of close attempts made on an oracle.
    pub fn closes(&self, id: u64) -> usize {
        self.events()
            .iter()
            .filter(|event| **event == Event::Closed { id })
            .count()
    }
}

impl crate::Factory for Factory {
    type Oracle = Oracle;
    type Error = Error;

    async fn create_plugin_oracle(
        &mut self,
        plugin: PluginType,
        config: &OcrConfigWithMeta,
    ) -> Result<Oracle, Error> {
        self.create(Role::Plugin, plugin, config.config_digest)
    }

    async fn create_bootstrap_oracle(
        &mut self,
        config: &OcrConfigWithMeta,
    ) -> Result<Oracle, Error> {
        self.create(
            Role::Bootstrap,
            config.config.plugin_type,
            config.config_digest,
        )
    }
}

/// An [crate::Oracle] constructed by a [Factory].
pub struct Oracle {
    id: u64,
    role: Role,
    digest: Digest,
    inner: Arc<Mutex<Inner>>,
}

impl Oracle {
    /// Identifier assigned by the [Factory].
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl crate::Oracle for Oracle {
    type Error = Error;

    async fn start(&mut self) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(Event::Started { id: self.id });
        if inner.fail_start.contains(&(self.role, self.digest)) {
            return Err(Error::Start);
        }
        if let Some((_, _, status)) = inner.oracles.get_mut(&self.id) {
            *status = Status::Running;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.push(Event::Closed { id: self.id });
        if inner.fail_close.contains(&(self.role, self.digest)) {
            return Err(Error::Close);
        }
        if let Some((_, _, status)) = inner.oracles.get_mut(&self.id) {
            *status = Status::Closed;
        }
        Ok(())
    }
}
