//! Model and diff snapshots of an on-chain capability registry.
//!
//! The registry records which Decentralized Oracle Networks (DONs) exist, which peers are members
//! of each, and which capabilities each DON is configured to serve. A poller periodically reads the
//! registry and produces an immutable [Snapshot]. This crate provides:
//!
//! - The data model of a [Snapshot] ([Don], [Capability], [Node]).
//! - Membership predicates ([is_member_of_don], [is_member_of_bootstrap_subcommittee]).
//! - A pure [diff] between the registry state already reflected locally and the latest
//!   [Snapshot], restricted to the DONs serving a single capability.
//!
//! Nothing in this crate performs I/O: all functions are deterministic given their inputs.

mod diff;
pub use diff::{diff, filter, Diff};
mod membership;
pub use membership::{is_member_of_bootstrap_subcommittee, is_member_of_don};
mod types;
pub use types::{
    Capability, CapabilityId, CapabilityType, Don, DonId, Node, PeerId, ResponseType, Snapshot,
    PEER_ID_LENGTH,
};

use thiserror::Error;

/// Errors that can occur when interpreting registry state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("capability not found: {0}")]
    CapabilityNotFound(CapabilityId),
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),
}
