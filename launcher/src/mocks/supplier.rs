use super::Error;
use crate::{OcrConfigWithMeta, PluginType};
use don_registry::DonId;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

struct Inner {
    ready: bool,
    configs: HashMap<(DonId, PluginType), Vec<OcrConfigWithMeta>>,
    failing: HashSet<DonId>,
    fetches: usize,
}

/// A scripted [crate::Supplier].
///
/// Serves whatever configurations were last set for a (DON, plugin) pair and no configurations
/// otherwise. Clones share the same script.
#[derive(Clone)]
pub struct Supplier {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Supplier {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                ready: true,
                configs: HashMap::new(),
                failing: HashSet::new(),
                fetches: 0,
            })),
        }
    }
}

impl Supplier {
    /// Set whether the supplier can serve configurations.
    pub fn set_ready(&self, ready: bool) {
        self.inner.lock().unwrap().ready = ready;
    }

    /// Set the configurations served for a (DON, plugin) pair.
    pub fn set_configs(&self, don: DonId, plugin: PluginType, configs: Vec<OcrConfigWithMeta>) {
        self.inner
            .lock()
            .unwrap()
            .configs
            .insert((don, plugin), configs);
    }

    /// Fail (or stop failing) every fetch for `don`.
    pub fn fail_fetch(&self, don: DonId, fail: bool) {
        let mut inner = self.inner.lock().unwrap();
        if fail {
            inner.failing.insert(don);
        } else {
            inner.failing.remove(&don);
        }
    }

    /// Number of fetches served (or failed) so far.
    pub fn fetches(&self) -> usize {
        self.inner.lock().unwrap().fetches
    }
}

impl crate::Supplier for Supplier {
    type Error = Error;

    fn ready(&self) -> Result<(), Error> {
        if self.inner.lock().unwrap().ready {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    async fn ocr_configs(
        &mut self,
        don: DonId,
        plugin: PluginType,
    ) -> Result<Vec<OcrConfigWithMeta>, Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.fetches += 1;
        if inner.failing.contains(&don) {
            return Err(Error::Fetch);
        }
        let configs = inner.configs.get(&(don, plugin)).cloned();
        Ok(configs.unwrap_or_default())
    }
}
