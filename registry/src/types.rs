//! Types recorded in the capability registry.

use crate::Error;
use bytes::Bytes;
use commonware_utils::{from_hex_formatted, hex};
use std::{
    collections::BTreeMap,
    fmt::{Debug, Display, Formatter},
    str::FromStr,
};

/// Identifier of a DON in the registry.
pub type DonId = u32;

/// Length of a [PeerId] in bytes.
pub const PEER_ID_LENGTH: usize = 32;

/// Fingerprint of a peer's public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PeerId([u8; PEER_ID_LENGTH]);

impl PeerId {
    /// Create a new [PeerId] from raw bytes.
    pub const fn new(bytes: [u8; PEER_ID_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl From<[u8; PEER_ID_LENGTH]> for PeerId {
    fn from(bytes: [u8; PEER_ID_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for PeerId {
    type Err = Error;

    /// Parse a hex-encoded peer id (an optional `0x` prefix is stripped).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = from_hex_formatted(s)
            .ok_or_else(|| Error::InvalidPeerId(s.to_string()))?;
        let bytes: [u8; PEER_ID_LENGTH] = bytes
            .try_into()
            .map_err(|_| Error::InvalidPeerId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

/// Labelled identifier of a capability (`<labelled_name>@<version>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityId(String);

impl CapabilityId {
    /// Create the identifier of the capability with the given name and version.
    pub fn new(labelled_name: &str, version: &str) -> Self {
        Self(format!("{labelled_name}@{version}"))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CapabilityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Display for CapabilityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The role a capability plays in a workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CapabilityType {
    Trigger,
    Action,
    Consensus,
    Target,
}

/// How the responses of a capability's members are expected to relate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResponseType {
    /// Members produce a single report.
    Report,
    /// Members produce identical observations.
    ObservationIdentical,
}

/// A capability registered in the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capability {
    pub labelled_name: String,
    pub version: String,
    pub capability_type: CapabilityType,
    pub response_type: ResponseType,

    /// Contract that validates configuration for this capability, if any.
    pub configuration_contract: Option<Bytes>,
}

impl Capability {
    /// Returns the labelled identifier of the capability.
    pub fn id(&self) -> CapabilityId {
        CapabilityId::new(&self.labelled_name, &self.version)
    }
}

/// A node registered in the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub peer_id: PeerId,
    pub node_operator_id: u32,
    pub signer: [u8; 32],
    pub encryption_public_key: [u8; 32],
    pub config_count: u32,
    pub hashed_capability_ids: Vec<[u8; 32]>,
    pub capabilities_dons: Vec<DonId>,
}

/// A DON as recorded in the registry.
///
/// A [Don] is never mutated once read: successive copies are compared by [DonId] and
/// `config_count`, which the registry increments on every reconfiguration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Don {
    pub id: DonId,
    pub config_count: u32,
    pub f: u8,
    pub is_public: bool,
    pub accepts_workflows: bool,

    /// Peers participating in the DON (order carries no meaning).
    pub members: Vec<PeerId>,

    /// Opaque per-capability configuration.
    pub capability_configurations: BTreeMap<CapabilityId, Bytes>,
}

impl Don {
    /// Create a DON with no capability configurations.
    pub fn new(id: DonId, config_count: u32, f: u8, members: Vec<PeerId>) -> Self {
        Self {
            id,
            config_count,
            f,
            is_public: false,
            accepts_workflows: false,
            members,
            capability_configurations: BTreeMap::new(),
        }
    }

    /// Attach a configuration for `capability` to the DON.
    pub fn with_capability(mut self, capability: CapabilityId, config: Bytes) -> Self {
        self.capability_configurations.insert(capability, config);
        self
    }

    /// Returns true if the DON is configured to serve `capability`.
    pub fn serves(&self, capability: &CapabilityId) -> bool {
        self.capability_configurations.contains_key(capability)
    }
}

/// Full registry state read at some point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub dons: BTreeMap<DonId, Don>,
    pub capabilities: BTreeMap<CapabilityId, Capability>,
    pub nodes: BTreeMap<PeerId, Node>,
}

impl Snapshot {
    /// Add a capability, keyed by its labelled identifier.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability.id(), capability);
        self
    }

    /// Add (or replace) a DON.
    pub fn with_don(mut self, don: Don) -> Self {
        self.dons.insert(don.id, don);
        self
    }

    /// Add (or replace) a node.
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.insert(node.peer_id, node);
        self
    }
}
