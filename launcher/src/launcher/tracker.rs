use super::metrics::{self, Kind};
use crate::{
    deployment::{DonDeployment, Summary, Transition},
    Error, Errors, Factory, OcrConfigWithMeta, PluginType, Supplier,
};
use don_registry::{is_member_of_don, Diff, Don, DonId, PeerId};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Deployments of the DONs this node participates in, and the registry state they reflect.
///
/// A DON is present in `dons` if and only if it is present in `applied`. Both are only ever
/// updated together, once every operation on the DON has succeeded.
pub struct Tracker<F: Factory> {
    peer: PeerId,
    factory: F,

    dons: BTreeMap<DonId, DonDeployment<F::Oracle>>,
    applied: BTreeMap<DonId, Don>,

    metrics: metrics::Metrics,
}

impl<F: Factory> Tracker<F> {
    pub fn new(peer: PeerId, factory: F, metrics: metrics::Metrics) -> Self {
        Self {
            peer,
            factory,
            dons: BTreeMap::new(),
            applied: BTreeMap::new(),
            metrics,
        }
    }

    /// Registry state reflected by the running deployments.
    pub fn applied(&self) -> &BTreeMap<DonId, Don> {
        &self.applied
    }

    /// Deployment of a tracked DON.
    #[cfg(test)]
    pub fn deployment(&self, don: DonId) -> Option<&DonDeployment<F::Oracle>> {
        self.dons.get(&don)
    }

    /// Summarize every tracked deployment, ordered by DON.
    pub fn summary(&self) -> Vec<Summary> {
        self.dons.values().map(DonDeployment::summary).collect()
    }

    /// Apply a [Diff] in order: removed, added, then updated DONs.
    ///
    /// The first failure aborts the remaining work. DONs processed before the failure keep their
    /// new state.
    pub async fn process<S: Supplier>(
        &mut self,
        supplier: &mut S,
        diff: Diff,
    ) -> Result<(), Error> {
        let result = self.apply(supplier, diff).await;
        self.update_gauges();
        result
    }

    /// A DON whose failure never clears is retried (and logged) on every pass, and holds back
    /// every DON after it.
    async fn apply<S: Supplier>(&mut self, supplier: &mut S, diff: Diff) -> Result<(), Error> {
        let Diff {
            added,
            removed,
            updated,
        } = diff;
        for id in removed.into_keys() {
            if let Err(err) = self.remove(id).await {
                error!(don = id, ?err, "failed to remove don");
                return Err(err);
            }
        }
        for (id, don) in added {
            if let Err(err) = self.add(supplier, id, don).await {
                error!(don = id, ?err, "failed to add don");
                return Err(err);
            }
        }
        for (id, don) in updated {
            if let Err(err) = self.update(supplier, id, don).await {
                error!(don = id, ?err, "failed to update don");
                return Err(err);
            }
        }
        Ok(())
    }

    async fn remove(&mut self, id: DonId) -> Result<(), Error> {
        let Some(deployment) = self.dons.get_mut(&id) else {
            debug!(don = id, "skipping removal of untracked don");
            return Ok(());
        };
        deployment.close().await?;
        self.untrack(id);
        info!(don = id, "removed deployment");
        Ok(())
    }

    async fn add<S: Supplier>(
        &mut self,
        supplier: &mut S,
        id: DonId,
        don: Don,
    ) -> Result<(), Error> {
        if self.dons.contains_key(&id) {
            return Err(Error::AlreadyTracked(id));
        }
        if !is_member_of_don(&don, &self.peer) {
            debug!(don = id, "skipping don without local membership");
            return Ok(());
        }

        let (commit, exec) = fetch(supplier, id).await?;
        let mut deployment =
            DonDeployment::create(&mut self.factory, &self.peer, id, &commit, &exec).await?;
        if let Err(err) = deployment.start_primary().await {
            if let Err(err) = deployment.close_active().await {
                warn!(don = id, ?err, "failed to close deployment after failed start");
            }
            return Err(err);
        }

        let summary = deployment.summary();
        info!(
            don = id,
            commit = %summary.commit.primary,
            exec = %summary.exec.primary,
            "created deployment"
        );
        self.metrics.transition(Kind::Creation);
        self.dons.insert(id, deployment);
        self.applied.insert(id, don);
        Ok(())
    }

    async fn update<S: Supplier>(
        &mut self,
        supplier: &mut S,
        id: DonId,
        don: Don,
    ) -> Result<(), Error> {
        let Some(deployment) = self.dons.get_mut(&id) else {
            return Err(Error::Untracked(id));
        };

        // The node may have been removed from the DON
        if !is_member_of_don(&don, &self.peer) {
            deployment.close().await?;
            self.untrack(id);
            info!(don = id, "removed deployment after losing membership");
            return Ok(());
        }

        let (commit, exec) = fetch(supplier, id).await?;
        let rotation = deployment
            .rotation(&mut self.factory, &self.peer, &commit, &exec)
            .await?;
        let kinds = [kind(&rotation.commit), kind(&rotation.exec)];
        deployment.transition(rotation).await?;

        for (plugin, kind) in PluginType::ALL.into_iter().zip(kinds) {
            let Some(kind) = kind else {
                continue;
            };
            info!(don = id, %plugin, ?kind, "rotated deployment");
            self.metrics.transition(kind);
        }
        self.applied.insert(id, don);
        Ok(())
    }

    /// Close every tracked deployment, attempting all of them regardless of failures.
    ///
    /// Nothing is tracked afterwards.
    pub async fn close(&mut self) -> Result<(), Error> {
        let mut errors = Errors::default();
        for (id, mut deployment) in std::mem::take(&mut self.dons) {
            if let Err(err) = deployment.close().await {
                warn!(don = id, ?err, "failed to close deployment");
                errors.push(Err(err));
            }
        }
        self.applied.clear();
        self.update_gauges();
        errors.into_result()
    }

    fn untrack(&mut self, id: DonId) {
        self.dons.remove(&id);
        self.applied.remove(&id);
        self.metrics.transition(Kind::Removal);
    }

    fn update_gauges(&self) {
        let candidates = self
            .dons
            .values()
            .map(|deployment| {
                PluginType::ALL
                    .into_iter()
                    .filter(|plugin| deployment.has_candidate(*plugin))
                    .count()
            })
            .sum::<usize>();
        self.metrics.tracked.set(self.dons.len() as i64);
        self.metrics.candidates.set(candidates as i64);
    }
}

/// Fetch the configurations of both pipelines of a DON.
async fn fetch<S: Supplier>(
    supplier: &mut S,
    don: DonId,
) -> Result<(Vec<OcrConfigWithMeta>, Vec<OcrConfigWithMeta>), Error> {
    let commit = fetch_plugin(supplier, don, PluginType::Commit).await?;
    let exec = fetch_plugin(supplier, don, PluginType::Exec).await?;
    Ok((commit, exec))
}

async fn fetch_plugin<S: Supplier>(
    supplier: &mut S,
    don: DonId,
    plugin: PluginType,
) -> Result<Vec<OcrConfigWithMeta>, Error> {
    supplier
        .ocr_configs(don, plugin)
        .await
        .map_err(|err| Error::Supplier {
            don,
            plugin,
            source: Box::new(err),
        })
}

fn kind<O: crate::Oracle>(transition: &Transition<O>) -> Option<Kind> {
    match transition {
        Transition::Unchanged => None,
        Transition::NewCandidate(_) => Some(Kind::NewCandidate),
        Transition::Promotion => Some(Kind::Promotion),
        Transition::Revocation => Some(Kind::Revocation),
    }
}
