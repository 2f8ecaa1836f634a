//! Launch, rotate, and tear down the oracles of every DON this node participates in.
//!
//! # Overview
//!
//! The core of the module is the [Actor]. It tracks a
//! [DonDeployment](crate::deployment::DonDeployment) for every DON that serves the configured
//! capability and lists this node as a member. On every tick, it diffs the latest registry
//! [Snapshot](don_registry::Snapshot) against the registry state already reflected by its
//! deployments and applies the result.
//!
//! The [Mailbox] is used to interact with the [Actor]. Snapshots pushed with [Mailbox::launch]
//! are stored without waiting on the actor, so a registry poller is never blocked by a slow tick.
//! Only the latest snapshot is kept: snapshots pushed between two ticks are collapsed into one
//! diff.
//!
//! # Details
//!
//! A tick processes removed DONs first, then added DONs, then updated DONs:
//! - Removed: close every oracle of the DON and stop tracking it. DONs that were never tracked are
//!   skipped.
//! - Added: if this node is a member, fetch exactly one configuration per plugin pipeline, create
//!   the primary oracles, and start them. If starting fails, the DON is left untracked (after a
//!   best-effort close) and retried on the next tick.
//! - Updated: fetch the configurations of both pipelines and transition the existing deployment
//!   (new candidate, promotion, or revocation). If this node is no longer a member, the
//!   deployment is closed instead.
//!
//! Changes are committed per DON: a DON's deployment and its applied registry state are only
//! updated once every operation on that DON has succeeded. The first failure ends the tick, and
//! the remaining work is picked up by the next tick.
//!
//! On shutdown (either through [Mailbox::close] or the runtime stop signal), no further tick runs
//! and every tracked deployment is closed.

mod actor;
pub use actor::Actor;
mod config;
pub use config::Config;
mod ingress;
pub use ingress::Mailbox;
mod metrics;
mod tracker;
