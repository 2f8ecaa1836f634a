use crate::{Factory, Supplier};
use don_registry::{CapabilityId, PeerId};
use std::time::Duration;

/// Configuration for the [Actor](super::Actor).
pub struct Config<S: Supplier, F: Factory> {
    /// Capability whose DONs are deployed.
    pub capability: CapabilityId,

    /// Peer identity of this node.
    pub peer: PeerId,

    /// Supplier of the OCR configurations of each DON.
    pub supplier: S,

    /// Factory of oracles.
    pub factory: F,

    /// Interval between ticks.
    pub tick_interval: Duration,

    /// The maximum size of the mailbox backlog.
    pub mailbox_size: usize,
}
