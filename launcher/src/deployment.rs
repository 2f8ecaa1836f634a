//! Primary/candidate deployment of the plugin pipelines of a DON.
//!
//! Each [PluginDeployment] always has a primary [Slot] and optionally a candidate [Slot]. A slot
//! owns the plugin [Oracle] of one configuration and, if this node belongs to that
//! configuration's bootstrap subcommittee, a bootstrap [Oracle] serving the same configuration.
//!
//! # Transitions
//!
//! Transitions are driven by the configurations the home chain reports for a pipeline:
//!
//! | state                 | configs                         | transition              |
//! |-----------------------|---------------------------------|-------------------------|
//! | none                  | `[a]`                           | creation                |
//! | `PrimaryOnly(a)`      | `[a]`                           | unchanged               |
//! | `PrimaryOnly(a)`      | `[a, b]`                        | new candidate `b`       |
//! | `PrimaryAndCandidate(a, b)` | `[b]`                     | promotion of `b`        |
//! | `PrimaryAndCandidate(a, b)` | `[a]`                     | revocation of `b`       |
//! | `PrimaryAndCandidate(a, b)` | `[a, b]`                  | unchanged               |
//!
//! Anything else is rejected with [Error::InvalidTransition].
//!
//! On promotion, the candidate handle (already running) is moved into the primary slot and is
//! never restarted. The obsolete primary is closed first.
//!
//! # Failures
//!
//! Operations touching more than one handle attempt every handle and aggregate the failures. A
//! pipeline whose transition fails keeps its previous slots, so the same transition is attempted
//! again on the next pass.

use crate::{Digest, Error, Errors, Factory, OcrConfigWithMeta, Oracle, PluginType, Role};
use don_registry::{is_member_of_bootstrap_subcommittee, DonId, PeerId};
use std::fmt::{Display, Formatter};
use tracing::{debug, warn};

/// State of a [PluginDeployment].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    PrimaryOnly,
    PrimaryAndCandidate,
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            State::PrimaryOnly => f.write_str("primary-only"),
            State::PrimaryAndCandidate => f.write_str("primary-and-candidate"),
        }
    }
}

/// A plugin [Oracle] and its optional bootstrap companion, serving one configuration.
///
/// A handle is dropped from the slot as soon as it closes successfully, so closing a partially
/// closed slot again only closes the handles still open.
pub struct Slot<O: Oracle> {
    plugin: PluginType,
    digest: Digest,
    oracle: Option<O>,
    bootstrap: Option<O>,
}

impl<O: Oracle> Slot<O> {
    /// Construct (but do not start) the oracles serving `config`.
    ///
    /// A bootstrap oracle is only constructed if `peer` belongs to the bootstrap subcommittee
    /// of `config`.
    pub async fn create<F: Factory<Oracle = O>>(
        factory: &mut F,
        peer: &PeerId,
        plugin: PluginType,
        config: &OcrConfigWithMeta,
    ) -> Result<Self, Error> {
        let digest = config.config_digest;
        let oracle = factory
            .create_plugin_oracle(plugin, config)
            .await
            .map_err(|err| Error::Factory {
                plugin,
                role: Role::Plugin,
                digest,
                source: Box::new(err),
            })?;
        let member = is_member_of_bootstrap_subcommittee(&config.config.bootstrap_peers, peer);
        let bootstrap = if member {
            let bootstrap = factory
                .create_bootstrap_oracle(config)
                .await
                .map_err(|err| Error::Factory {
                    plugin,
                    role: Role::Bootstrap,
                    digest,
                    source: Box::new(err),
                })?;
            Some(bootstrap)
        } else {
            None
        };
        Ok(Self {
            plugin,
            digest,
            oracle: Some(oracle),
            bootstrap,
        })
    }

    /// Digest of the configuration served by this slot.
    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// The plugin oracle, unless it was closed.
    pub fn oracle(&self) -> Option<&O> {
        self.oracle.as_ref()
    }

    /// The bootstrap oracle, if this node is part of the bootstrap subcommittee and it was not
    /// closed.
    pub fn bootstrap(&self) -> Option<&O> {
        self.bootstrap.as_ref()
    }

    /// Start the plugin oracle and, if present, the bootstrap oracle.
    pub async fn start(&mut self) -> Result<(), Error> {
        let mut errors = Errors::default();
        for (role, handle) in [
            (Role::Plugin, &mut self.oracle),
            (Role::Bootstrap, &mut self.bootstrap),
        ] {
            let Some(oracle) = handle.as_mut() else {
                continue;
            };
            errors.push(oracle.start().await.map_err(|err| Error::Start {
                plugin: self.plugin,
                role,
                digest: self.digest,
                source: Box::new(err),
            }));
        }
        errors.into_result()
    }

    /// Close the plugin oracle and, if present, the bootstrap oracle.
    ///
    /// Handles that close successfully are released. Handles that fail to close are kept so the
    /// close can be retried.
    pub async fn close(&mut self) -> Result<(), Error> {
        let mut errors = Errors::default();
        for (role, handle) in [
            (Role::Plugin, &mut self.oracle),
            (Role::Bootstrap, &mut self.bootstrap),
        ] {
            let Some(oracle) = handle.as_mut() else {
                continue;
            };
            match oracle.close().await {
                Ok(()) => *handle = None,
                Err(err) => errors.push(Err(Error::Close {
                    plugin: self.plugin,
                    role,
                    digest: self.digest,
                    source: Box::new(err),
                })),
            }
        }
        errors.into_result()
    }
}

/// Change to apply to a [PluginDeployment].
pub enum Transition<O: Oracle> {
    /// The reported configurations match the running slots.
    Unchanged,
    /// Start the given (unstarted) slot alongside the primary.
    NewCandidate(Slot<O>),
    /// Close the primary and move the running candidate in its place.
    Promotion,
    /// Close the candidate, keeping the primary.
    Revocation,
}

impl<O: Oracle> Transition<O> {
    fn name(&self) -> &'static str {
        match self {
            Transition::Unchanged => "unchanged",
            Transition::NewCandidate(_) => "new-candidate",
            Transition::Promotion => "promotion",
            Transition::Revocation => "revocation",
        }
    }
}

/// Summary of a [PluginDeployment].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginSummary {
    pub state: State,
    pub primary: Digest,
    pub candidate: Option<Digest>,
}

/// Primary/candidate deployment of one plugin pipeline.
pub struct PluginDeployment<O: Oracle> {
    plugin: PluginType,
    primary: Slot<O>,
    candidate: Option<Slot<O>>,
}

impl<O: Oracle> PluginDeployment<O> {
    /// Create a deployment whose primary serves the only reported configuration.
    pub async fn create<F: Factory<Oracle = O>>(
        factory: &mut F,
        peer: &PeerId,
        don: DonId,
        plugin: PluginType,
        configs: &[OcrConfigWithMeta],
    ) -> Result<Self, Error> {
        let [config] = configs else {
            return Err(Error::ConfigCount {
                don,
                plugin,
                count: configs.len(),
            });
        };
        let primary = Slot::create(factory, peer, plugin, config).await?;
        Ok(Self {
            plugin,
            primary,
            candidate: None,
        })
    }

    /// Current state of the deployment.
    pub fn state(&self) -> State {
        if self.candidate.is_some() {
            State::PrimaryAndCandidate
        } else {
            State::PrimaryOnly
        }
    }

    /// The primary slot.
    pub fn primary(&self) -> &Slot<O> {
        &self.primary
    }

    /// The candidate slot, if any.
    pub fn candidate(&self) -> Option<&Slot<O>> {
        self.candidate.as_ref()
    }

    /// Returns true if a candidate is deployed.
    pub fn has_candidate(&self) -> bool {
        self.candidate.is_some()
    }

    /// Summarize the deployment.
    pub fn summary(&self) -> PluginSummary {
        PluginSummary {
            state: self.state(),
            primary: self.primary.digest,
            candidate: self.candidate.as_ref().map(|slot| slot.digest),
        }
    }

    /// Determine the [Transition] implied by the configurations currently reported.
    ///
    /// If a new candidate is required, its oracles are constructed (but not started).
    pub async fn plan<F: Factory<Oracle = O>>(
        &self,
        factory: &mut F,
        peer: &PeerId,
        configs: &[OcrConfigWithMeta],
    ) -> Result<Transition<O>, Error> {
        let primary = self.primary.digest;
        let candidate = self.candidate.as_ref().map(|slot| slot.digest);
        match (candidate, configs) {
            (None, [only]) if only.config_digest == primary => Ok(Transition::Unchanged),
            (None, [active, next]) if active.config_digest == primary => {
                let slot = Slot::create(factory, peer, self.plugin, next).await?;
                Ok(Transition::NewCandidate(slot))
            }
            (Some(candidate), [only]) if only.config_digest == candidate => {
                Ok(Transition::Promotion)
            }
            (Some(_), [only]) if only.config_digest == primary => Ok(Transition::Revocation),
            (Some(candidate), [active, next])
                if active.config_digest == primary && next.config_digest == candidate =>
            {
                Ok(Transition::Unchanged)
            }
            _ => Err(Error::InvalidTransition {
                plugin: self.plugin,
                state: self.state(),
                count: configs.len(),
            }),
        }
    }

    /// Apply a [Transition].
    ///
    /// If the transition fails, the deployment keeps its previous slots.
    pub async fn apply(&mut self, transition: Transition<O>) -> Result<(), Error> {
        let name = transition.name();
        match transition {
            Transition::Unchanged => return Ok(()),
            Transition::NewCandidate(mut slot) => {
                if self.candidate.is_some() {
                    return Err(Error::InvalidTransition {
                        plugin: self.plugin,
                        state: self.state(),
                        count: 2,
                    });
                }
                if let Err(err) = slot.start().await {
                    if let Err(err) = slot.close().await {
                        warn!(
                            plugin = %self.plugin,
                            digest = %slot.digest,
                            ?err,
                            "failed to close candidate after failed start"
                        );
                    }
                    return Err(err);
                }
                self.candidate = Some(slot);
            }
            Transition::Promotion => {
                if self.candidate.is_none() {
                    return Err(Error::InvalidTransition {
                        plugin: self.plugin,
                        state: self.state(),
                        count: 1,
                    });
                }
                self.close_primary().await?;
                if let Some(candidate) = self.candidate.take() {
                    self.primary = candidate;
                }
            }
            Transition::Revocation => {
                let Some(candidate) = self.candidate.as_mut() else {
                    return Err(Error::InvalidTransition {
                        plugin: self.plugin,
                        state: self.state(),
                        count: 1,
                    });
                };
                candidate.close().await?;
                self.candidate = None;
            }
        }
        debug!(
            plugin = %self.plugin,
            transition = name,
            primary = %self.primary.digest,
            "applied transition"
        );
        Ok(())
    }

    /// Start the primary slot.
    pub async fn start_primary(&mut self) -> Result<(), Error> {
        self.primary.start().await
    }

    /// Close the primary slot.
    pub async fn close_primary(&mut self) -> Result<(), Error> {
        self.primary.close().await
    }

    /// Close every slot.
    pub async fn close(&mut self) -> Result<(), Error> {
        let mut errors = Errors::default();
        errors.push(self.primary.close().await);
        if let Some(candidate) = self.candidate.as_mut() {
            errors.push(candidate.close().await);
        }
        errors.into_result()
    }
}

/// Transitions to apply to both pipelines of a [DonDeployment].
pub struct Rotation<O: Oracle> {
    pub commit: Transition<O>,
    pub exec: Transition<O>,
}

impl<O: Oracle> Rotation<O> {
    /// Returns true if neither pipeline changes.
    pub fn is_unchanged(&self) -> bool {
        matches!(
            (&self.commit, &self.exec),
            (Transition::Unchanged, Transition::Unchanged)
        )
    }
}

/// Summary of a [DonDeployment].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    pub don: DonId,
    pub commit: PluginSummary,
    pub exec: PluginSummary,
}

/// Deployment of both plugin pipelines of a DON.
pub struct DonDeployment<O: Oracle> {
    don: DonId,
    commit: PluginDeployment<O>,
    exec: PluginDeployment<O>,
}

impl<O: Oracle> DonDeployment<O> {
    /// Create (but do not start) the deployment of a newly added DON.
    ///
    /// Exactly one configuration must be reported for each pipeline.
    pub async fn create<F: Factory<Oracle = O>>(
        factory: &mut F,
        peer: &PeerId,
        don: DonId,
        commit: &[OcrConfigWithMeta],
        exec: &[OcrConfigWithMeta],
    ) -> Result<Self, Error> {
        let commit =
            PluginDeployment::create(factory, peer, don, PluginType::Commit, commit).await?;
        let exec = PluginDeployment::create(factory, peer, don, PluginType::Exec, exec).await?;
        Ok(Self { don, commit, exec })
    }

    /// Identifier of the deployed DON.
    pub fn don(&self) -> DonId {
        self.don
    }

    /// Deployment of the given pipeline.
    pub fn plugin(&self, plugin: PluginType) -> &PluginDeployment<O> {
        match plugin {
            PluginType::Commit => &self.commit,
            PluginType::Exec => &self.exec,
        }
    }

    fn plugin_mut(&mut self, plugin: PluginType) -> &mut PluginDeployment<O> {
        match plugin {
            PluginType::Commit => &mut self.commit,
            PluginType::Exec => &mut self.exec,
        }
    }

    /// Returns true if the given pipeline has a candidate deployed.
    pub fn has_candidate(&self, plugin: PluginType) -> bool {
        self.plugin(plugin).has_candidate()
    }

    /// Summarize the deployment.
    pub fn summary(&self) -> Summary {
        Summary {
            don: self.don,
            commit: self.commit.summary(),
            exec: self.exec.summary(),
        }
    }

    /// Start the primary slot of both pipelines.
    pub async fn start_primary(&mut self) -> Result<(), Error> {
        let mut errors = Errors::default();
        for plugin in PluginType::ALL {
            errors.push(self.plugin_mut(plugin).start_primary().await);
        }
        errors.into_result()
    }

    /// Close the primary slot of both pipelines.
    pub async fn close_active(&mut self) -> Result<(), Error> {
        let mut errors = Errors::default();
        for plugin in PluginType::ALL {
            errors.push(self.plugin_mut(plugin).close_primary().await);
        }
        errors.into_result()
    }

    /// Close every slot of both pipelines.
    pub async fn close(&mut self) -> Result<(), Error> {
        let mut errors = Errors::default();
        for plugin in PluginType::ALL {
            errors.push(self.plugin_mut(plugin).close().await);
        }
        errors.into_result()
    }

    /// Determine the [Rotation] implied by the configurations currently reported.
    pub async fn rotation<F: Factory<Oracle = O>>(
        &self,
        factory: &mut F,
        peer: &PeerId,
        commit: &[OcrConfigWithMeta],
        exec: &[OcrConfigWithMeta],
    ) -> Result<Rotation<O>, Error> {
        let commit = self.commit.plan(factory, peer, commit).await?;
        let exec = self.exec.plan(factory, peer, exec).await?;
        Ok(Rotation { commit, exec })
    }

    /// Transition both pipelines from their current slots.
    ///
    /// The exec pipeline is transitioned even if the commit pipeline fails. Errors from both are
    /// combined.
    pub async fn transition(&mut self, rotation: Rotation<O>) -> Result<(), Error> {
        let Rotation { commit, exec } = rotation;
        let mut errors = Errors::default();
        errors.push(self.commit.apply(commit).await);
        errors.push(self.exec.apply(exec).await);
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{self, factory::Event};
    use commonware_macros::test_async;

    const PEER: PeerId = PeerId::new([1; 32]);

    fn config(plugin: PluginType, digest: u8, bootstrap: bool) -> OcrConfigWithMeta {
        let bootstrap = if bootstrap { vec![PEER] } else { vec![] };
        mocks::ocr_config(plugin, Digest::new([digest; 32]), vec![PEER], bootstrap)
    }

    async fn deployment(
        factory: &mut mocks::Factory,
        bootstrap: bool,
    ) -> DonDeployment<mocks::Oracle> {
        DonDeployment::create(
            factory,
            &PEER,
            1,
            &[config(PluginType::Commit, 1, bootstrap)],
            &[config(PluginType::Exec, 2, bootstrap)],
        )
        .await
        .unwrap()
    }

    fn assert_candidate_has_primary(deployment: &DonDeployment<mocks::Oracle>) {
        for plugin in PluginType::ALL {
            let plugin = deployment.plugin(plugin);
            if plugin.has_candidate() {
                assert_eq!(plugin.state(), State::PrimaryAndCandidate);
                assert_ne!(plugin.candidate().unwrap().digest(), plugin.primary().digest());
            }
        }
    }

    #[test_async]
    async fn test_create_without_bootstrap() {
        let mut factory = mocks::Factory::default();
        let deployment = deployment(&mut factory, false).await;
        assert_eq!(deployment.don(), 1);
        for plugin in PluginType::ALL {
            assert_eq!(deployment.plugin(plugin).state(), State::PrimaryOnly);
            assert!(deployment.plugin(plugin).primary().bootstrap().is_none());
        }
        assert_eq!(factory.created().len(), 2);

        // Nothing is started on creation
        assert!(factory
            .events()
            .iter()
            .all(|event| matches!(event, Event::Created { .. })));
    }

    #[test_async]
    async fn test_create_with_bootstrap() {
        let mut factory = mocks::Factory::default();
        let deployment = deployment(&mut factory, true).await;
        for plugin in PluginType::ALL {
            assert!(deployment.plugin(plugin).primary().bootstrap().is_some());
        }
        assert_eq!(factory.created().len(), 4);
    }

    #[test_async]
    async fn test_create_config_count() {
        let mut factory = mocks::Factory::default();
        let result = DonDeployment::create(
            &mut factory,
            &PEER,
            7,
            &[
                config(PluginType::Commit, 1, false),
                config(PluginType::Commit, 3, false),
            ],
            &[config(PluginType::Exec, 2, false)],
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::ConfigCount {
                don: 7,
                plugin: PluginType::Commit,
                count: 2
            })
        ));

        let result = DonDeployment::create(
            &mut factory,
            &PEER,
            7,
            &[config(PluginType::Commit, 1, false)],
            &[],
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::ConfigCount {
                plugin: PluginType::Exec,
                count: 0,
                ..
            })
        ));
    }

    #[test_async]
    async fn test_start_primary_aggregates() {
        let mut factory = mocks::Factory::default();
        let mut deployment = deployment(&mut factory, true).await;
        factory.fail_start(Role::Plugin, Digest::new([1; 32]));
        factory.fail_start(Role::Bootstrap, Digest::new([2; 32]));

        let Err(Error::Multiple(errors)) = deployment.start_primary().await else {
            panic!("expected multiple errors");
        };
        assert_eq!(errors.len(), 2);

        // Every handle was started exactly once despite the failures
        for (id, _, _) in factory.created() {
            assert_eq!(factory.starts(id), 1);
        }
    }

    #[test_async]
    async fn test_new_candidate() {
        let mut factory = mocks::Factory::default();
        let mut deployment = deployment(&mut factory, true).await;
        deployment.start_primary().await.unwrap();

        let commit = [
            config(PluginType::Commit, 1, false),
            config(PluginType::Commit, 3, true),
        ];
        let exec = [config(PluginType::Exec, 2, true)];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        assert!(matches!(rotation.commit, Transition::NewCandidate(_)));
        assert!(matches!(rotation.exec, Transition::Unchanged));
        deployment.transition(rotation).await.unwrap();

        assert!(deployment.has_candidate(PluginType::Commit));
        assert!(!deployment.has_candidate(PluginType::Exec));
        assert_candidate_has_primary(&deployment);

        // The candidate (and its bootstrap) are running
        let candidate = deployment.plugin(PluginType::Commit).candidate().unwrap();
        assert_eq!(candidate.digest(), Digest::new([3; 32]));
        assert_eq!(factory.starts(candidate.oracle().unwrap().id()), 1);
        assert_eq!(factory.starts(candidate.bootstrap().unwrap().id()), 1);
    }

    #[test_async]
    async fn test_promotion_moves_candidate() {
        let mut factory = mocks::Factory::default();
        let mut deployment = deployment(&mut factory, true).await;
        deployment.start_primary().await.unwrap();
        let exec = [config(PluginType::Exec, 2, true)];

        // Deploy candidate
        let commit = [
            config(PluginType::Commit, 1, true),
            config(PluginType::Commit, 3, true),
        ];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        deployment.transition(rotation).await.unwrap();
        let old_primary = deployment.plugin(PluginType::Commit).primary();
        let old_primary = (
            old_primary.oracle().unwrap().id(),
            old_primary.bootstrap().unwrap().id(),
        );
        let candidate = deployment.plugin(PluginType::Commit).candidate().unwrap();
        let candidate = (
            candidate.oracle().unwrap().id(),
            candidate.bootstrap().unwrap().id(),
        );

        // Promote candidate
        let commit = [config(PluginType::Commit, 3, true)];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        assert!(matches!(rotation.commit, Transition::Promotion));
        deployment.transition(rotation).await.unwrap();

        let plugin = deployment.plugin(PluginType::Commit);
        assert_eq!(plugin.state(), State::PrimaryOnly);
        assert!(plugin.candidate().is_none());
        assert_eq!(plugin.primary().oracle().unwrap().id(), candidate.0);
        assert_eq!(plugin.primary().bootstrap().unwrap().id(), candidate.1);
        assert_eq!(factory.starts(candidate.0), 1);
        assert_eq!(factory.closes(candidate.0), 0);
        assert_eq!(factory.closes(old_primary.0), 1);
        assert_eq!(factory.closes(old_primary.1), 1);
        assert_candidate_has_primary(&deployment);
    }

    #[test_async]
    async fn test_revocation() {
        let mut factory = mocks::Factory::default();
        let mut deployment = deployment(&mut factory, false).await;
        deployment.start_primary().await.unwrap();
        let exec = [config(PluginType::Exec, 2, false)];

        let commit = [
            config(PluginType::Commit, 1, false),
            config(PluginType::Commit, 3, false),
        ];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        deployment.transition(rotation).await.unwrap();
        let primary = deployment
            .plugin(PluginType::Commit)
            .primary()
            .oracle()
            .unwrap()
            .id();
        let candidate = deployment
            .plugin(PluginType::Commit)
            .candidate()
            .unwrap()
            .oracle()
            .unwrap()
            .id();

        let commit = [config(PluginType::Commit, 1, false)];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        assert!(matches!(rotation.commit, Transition::Revocation));
        deployment.transition(rotation).await.unwrap();

        let plugin = deployment.plugin(PluginType::Commit);
        assert_eq!(plugin.state(), State::PrimaryOnly);
        assert_eq!(plugin.primary().oracle().unwrap().id(), primary);
        assert_eq!(factory.closes(candidate), 1);
        assert_eq!(factory.closes(primary), 0);
    }

    #[test_async]
    async fn test_invalid_transitions() {
        let mut factory = mocks::Factory::default();
        let mut deployment = deployment(&mut factory, false).await;
        let exec = [config(PluginType::Exec, 2, false)];

        // No configs
        let result = deployment.rotation(&mut factory, &PEER, &[], &exec).await;
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                plugin: PluginType::Commit,
                state: State::PrimaryOnly,
                count: 0
            })
        ));

        // Replacement of the primary without a candidate
        let commit = [config(PluginType::Commit, 9, false)];
        let result = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await;
        assert!(matches!(result, Err(Error::InvalidTransition { count: 1, .. })));

        // Three configs
        let commit = [
            config(PluginType::Commit, 1, false),
            config(PluginType::Commit, 3, false),
            config(PluginType::Commit, 4, false),
        ];
        let result = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await;
        assert!(matches!(result, Err(Error::InvalidTransition { count: 3, .. })));

        // A second, different candidate while one is already deployed
        let commit = [
            config(PluginType::Commit, 1, false),
            config(PluginType::Commit, 3, false),
        ];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        deployment.transition(rotation).await.unwrap();
        let commit = [
            config(PluginType::Commit, 1, false),
            config(PluginType::Commit, 4, false),
        ];
        let result = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await;
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                state: State::PrimaryAndCandidate,
                count: 2,
                ..
            })
        ));

        // The same pair is not a change
        let commit = [
            config(PluginType::Commit, 1, false),
            config(PluginType::Commit, 3, false),
        ];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        assert!(rotation.is_unchanged());
        assert_candidate_has_primary(&deployment);
    }

    #[test_async]
    async fn test_failed_candidate_start_keeps_previous() {
        let mut factory = mocks::Factory::default();
        let mut deployment = deployment(&mut factory, false).await;
        deployment.start_primary().await.unwrap();
        factory.fail_start(Role::Plugin, Digest::new([3; 32]));

        let commit = [
            config(PluginType::Commit, 1, false),
            config(PluginType::Commit, 3, false),
        ];
        let exec = [config(PluginType::Exec, 2, false)];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        assert!(matches!(
            deployment.transition(rotation).await,
            Err(Error::Start {
                plugin: PluginType::Commit,
                role: Role::Plugin,
                ..
            })
        ));
        assert_eq!(deployment.plugin(PluginType::Commit).state(), State::PrimaryOnly);

        // The failed candidate was cleaned up
        let failed = factory.oracle(Role::Plugin, Digest::new([3; 32])).unwrap();
        assert_eq!(factory.closes(failed), 1);
    }

    #[test_async]
    async fn test_failed_promotion_keeps_previous() {
        let mut factory = mocks::Factory::default();
        let mut deployment = deployment(&mut factory, false).await;
        deployment.start_primary().await.unwrap();
        let exec = [config(PluginType::Exec, 2, false)];
        let commit = [
            config(PluginType::Commit, 1, false),
            config(PluginType::Commit, 3, false),
        ];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        deployment.transition(rotation).await.unwrap();

        // Closing the old primary fails, so the candidate is not promoted
        factory.fail_close(Role::Plugin, Digest::new([1; 32]));
        let commit = [config(PluginType::Commit, 3, false)];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        assert!(deployment.transition(rotation).await.is_err());
        assert_eq!(
            deployment.plugin(PluginType::Commit).state(),
            State::PrimaryAndCandidate
        );

        // Retrying after the failure clears succeeds
        factory.clear_failures();
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        deployment.transition(rotation).await.unwrap();
        let plugin = deployment.plugin(PluginType::Commit);
        assert_eq!(plugin.state(), State::PrimaryOnly);
        assert_eq!(plugin.primary().digest(), Digest::new([3; 32]));
    }

    #[test_async]
    async fn test_promotion_retry_closes_remaining_handles() {
        let mut factory = mocks::Factory::default();
        let mut deployment = deployment(&mut factory, true).await;
        deployment.start_primary().await.unwrap();
        let exec = [config(PluginType::Exec, 2, true)];
        let commit = [
            config(PluginType::Commit, 1, true),
            config(PluginType::Commit, 3, true),
        ];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        deployment.transition(rotation).await.unwrap();
        let old_primary = deployment.plugin(PluginType::Commit).primary();
        let old_primary = (
            old_primary.oracle().unwrap().id(),
            old_primary.bootstrap().unwrap().id(),
        );

        // The plugin handle closes but the bootstrap handle fails
        factory.fail_close(Role::Bootstrap, Digest::new([1; 32]));
        let commit = [config(PluginType::Commit, 3, true)];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        assert!(matches!(
            deployment.transition(rotation).await,
            Err(Error::Close {
                role: Role::Bootstrap,
                ..
            })
        ));
        let plugin = deployment.plugin(PluginType::Commit);
        assert_eq!(plugin.state(), State::PrimaryAndCandidate);
        assert!(plugin.primary().oracle().is_none());
        assert!(plugin.primary().bootstrap().is_some());

        // The retry only closes the handle that is still open
        factory.clear_failures();
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        deployment.transition(rotation).await.unwrap();
        assert_eq!(factory.closes(old_primary.0), 1);
        assert_eq!(factory.closes(old_primary.1), 2);
        let plugin = deployment.plugin(PluginType::Commit);
        assert_eq!(plugin.state(), State::PrimaryOnly);
        assert_eq!(plugin.primary().digest(), Digest::new([3; 32]));
    }

    #[test_async]
    async fn test_transition_continues_after_commit_failure() {
        let mut factory = mocks::Factory::default();
        let mut deployment = deployment(&mut factory, false).await;
        deployment.start_primary().await.unwrap();
        factory.fail_start(Role::Plugin, Digest::new([3; 32]));

        let commit = [
            config(PluginType::Commit, 1, false),
            config(PluginType::Commit, 3, false),
        ];
        let exec = [
            config(PluginType::Exec, 2, false),
            config(PluginType::Exec, 4, false),
        ];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        assert!(deployment.transition(rotation).await.is_err());
        assert!(!deployment.has_candidate(PluginType::Commit));
        assert!(deployment.has_candidate(PluginType::Exec));
        assert_candidate_has_primary(&deployment);
    }

    #[test_async]
    async fn test_close_aggregates() {
        for failing in 0..4 {
            let mut factory = mocks::Factory::default();
            let mut deployment = deployment(&mut factory, true).await;
            deployment.start_primary().await.unwrap();
            let commit = [
                config(PluginType::Commit, 1, true),
                config(PluginType::Commit, 3, true),
            ];
            let exec = [config(PluginType::Exec, 2, true)];
            let rotation = deployment
                .rotation(&mut factory, &PEER, &commit, &exec)
                .await
                .unwrap();
            deployment.transition(rotation).await.unwrap();

            // Fail one of the four commit handles (primary, primary bootstrap, candidate,
            // candidate bootstrap)
            let plugin = deployment.plugin(PluginType::Commit);
            let primary = plugin.primary();
            let candidate = plugin.candidate().unwrap();
            let handles = [
                (Role::Plugin, primary.digest()),
                (Role::Bootstrap, primary.digest()),
                (Role::Plugin, candidate.digest()),
                (Role::Bootstrap, candidate.digest()),
            ];
            let ids = [
                primary.oracle().unwrap().id(),
                primary.bootstrap().unwrap().id(),
                candidate.oracle().unwrap().id(),
                candidate.bootstrap().unwrap().id(),
            ];
            let exec = deployment.plugin(PluginType::Exec).primary();
            let exec = [exec.oracle().unwrap().id(), exec.bootstrap().unwrap().id()];
            let (role, digest) = handles[failing];
            factory.fail_close(role, digest);

            assert!(matches!(
                deployment.close().await,
                Err(Error::Close { .. })
            ));
            for id in ids {
                assert_eq!(factory.closes(id), 1);
            }

            // Exec handles are closed too
            for id in exec {
                assert_eq!(factory.closes(id), 1);
            }

            // Only the failed handle is closed again on retry
            factory.clear_failures();
            deployment.close().await.unwrap();
            for (i, id) in ids.into_iter().enumerate() {
                let expected = if i == failing { 2 } else { 1 };
                assert_eq!(factory.closes(id), expected);
            }
            for id in exec {
                assert_eq!(factory.closes(id), 1);
            }
        }
    }

    #[test_async]
    async fn test_close_active_only_closes_primary() {
        let mut factory = mocks::Factory::default();
        let mut deployment = deployment(&mut factory, false).await;
        deployment.start_primary().await.unwrap();
        let commit = [
            config(PluginType::Commit, 1, false),
            config(PluginType::Commit, 3, false),
        ];
        let exec = [config(PluginType::Exec, 2, false)];
        let rotation = deployment
            .rotation(&mut factory, &PEER, &commit, &exec)
            .await
            .unwrap();
        deployment.transition(rotation).await.unwrap();
        let candidate = deployment
            .plugin(PluginType::Commit)
            .candidate()
            .unwrap()
            .oracle()
            .unwrap()
            .id();
        let primaries = PluginType::ALL
            .map(|plugin| deployment.plugin(plugin).primary().oracle().unwrap().id());

        deployment.close_active().await.unwrap();
        assert_eq!(factory.closes(candidate), 0);
        for primary in primaries {
            assert_eq!(factory.closes(primary), 1);
        }
    }

    #[test_async]
    async fn test_factory_failure() {
        let mut factory = mocks::Factory::default();
        factory.fail_create(Digest::new([2; 32]));
        let result = DonDeployment::create(
            &mut factory,
            &PEER,
            1,
            &[config(PluginType::Commit, 1, false)],
            &[config(PluginType::Exec, 2, false)],
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::Factory {
                plugin: PluginType::Exec,
                role: Role::Plugin,
                ..
            })
        ));
    }
}
