//! Keep local oracle instances consistent with DON membership recorded in a capability registry.
//!
//! A node may participate in many Decentralized Oracle Networks (DONs). Each DON runs two plugin
//! pipelines ([PluginType::Commit] and [PluginType::Exec]) and each pipeline is deployed in a
//! primary/candidate fashion so that configuration rotations never drop liveness. The
//! [launcher::Actor] periodically diffs the latest registry [Snapshot](don_registry::Snapshot)
//! against the state it has already applied and creates, rotates, or tears down deployments
//! accordingly.
//!
//! # Collaborators
//!
//! The launcher never constructs oracles itself. It relies on:
//! - [Supplier]: serves the OCR configurations of a (DON, plugin) pair from the home chain.
//! - [Factory]: constructs (unstarted) [Oracle]s for a configuration.
//!
//! # Status
//!
//! `don-launcher` is **ALPHA** software and is not yet recommended for production use. Developers
//! should expect breaking changes and occasional instability.

use don_registry::DonId;
use std::future::Future;
use thiserror::Error;

pub mod deployment;
pub mod launcher;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
mod types;
pub use types::{Digest, OcrConfig, OcrConfigWithMeta, PluginType, Role, DIGEST_LENGTH};

/// Boxed error returned by a collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while launching oracles.
#[derive(Error, Debug)]
pub enum Error {
    #[error("registry: {0}")]
    Registry(#[from] don_registry::Error),
    #[error("failed to fetch {plugin} configs for don {don}: {source}")]
    Supplier {
        don: DonId,
        plugin: PluginType,
        source: BoxError,
    },
    #[error("failed to create {plugin} {role} oracle for {digest}: {source}")]
    Factory {
        plugin: PluginType,
        role: Role,
        digest: Digest,
        source: BoxError,
    },
    #[error("failed to start {plugin} {role} oracle for {digest}: {source}")]
    Start {
        plugin: PluginType,
        role: Role,
        digest: Digest,
        source: BoxError,
    },
    #[error("failed to close {plugin} {role} oracle for {digest}: {source}")]
    Close {
        plugin: PluginType,
        role: Role,
        digest: Digest,
        source: BoxError,
    },
    #[error("expected exactly one {plugin} config for new don {don}, found {count}")]
    ConfigCount {
        don: DonId,
        plugin: PluginType,
        count: usize,
    },
    #[error("invalid {plugin} transition from {state} with {count} configs")]
    InvalidTransition {
        plugin: PluginType,
        state: deployment::State,
        count: usize,
    },
    #[error("don {0} is not tracked")]
    Untracked(DonId),
    #[error("don {0} is already tracked")]
    AlreadyTracked(DonId),
    #[error("{} errors: {}", .0.len(), join(.0))]
    Multiple(Vec<Error>),
    #[error("closed")]
    Closed,
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Accumulates the errors of independent operations.
///
/// Every operation is attempted regardless of earlier failures. The result collapses to the
/// single error when only one occurred.
#[derive(Debug, Default)]
pub struct Errors(Vec<Error>);

impl Errors {
    /// Record the outcome of an operation.
    pub fn push(&mut self, result: Result<(), Error>) {
        match result {
            Ok(()) => {}
            Err(Error::Multiple(errors)) => self.0.extend(errors),
            Err(err) => self.0.push(err),
        }
    }

    /// Returns true if no error has been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Combine all recorded errors.
    pub fn into_result(mut self) -> Result<(), Error> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(Error::Multiple(self.0)),
        }
    }
}

/// A runnable oracle process.
///
/// Handles are created unstarted by a [Factory]. The launcher alone decides when to start and
/// close them.
pub trait Oracle: Send + Sync + 'static {
    /// Error returned when the oracle fails to start or close.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start the oracle.
    fn start(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Close the oracle, releasing any resources it holds.
    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Constructs [Oracle]s for OCR configurations.
pub trait Factory: Send + 'static {
    /// Handle produced by the factory.
    type Oracle: Oracle;

    /// Error returned when an oracle cannot be constructed.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Construct an unstarted oracle for the given plugin pipeline.
    fn create_plugin_oracle(
        &mut self,
        plugin: PluginType,
        config: &OcrConfigWithMeta,
    ) -> impl Future<Output = Result<Self::Oracle, Self::Error>> + Send;

    /// Construct an unstarted bootstrap oracle serving the given configuration.
    fn create_bootstrap_oracle(
        &mut self,
        config: &OcrConfigWithMeta,
    ) -> impl Future<Output = Result<Self::Oracle, Self::Error>> + Send;
}

/// Serves per-DON OCR configurations from the home chain.
pub trait Supplier: Send + 'static {
    /// Error returned when configurations cannot be served.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns an error if the supplier cannot serve configurations yet.
    fn ready(&self) -> Result<(), Self::Error>;

    /// Fetch the active (and, if any, candidate) configurations of a plugin pipeline.
    ///
    /// The home chain guarantees one or two configurations are returned. When two are returned,
    /// the second is the candidate.
    fn ocr_configs(
        &mut self,
        don: DonId,
        plugin: PluginType,
    ) -> impl Future<Output = Result<Vec<OcrConfigWithMeta>, Self::Error>> + Send;
}
