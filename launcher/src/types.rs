//! Types describing the OCR configurations served to a DON.

use bytes::Bytes;
use commonware_utils::hex;
use don_registry::PeerId;
use std::fmt::{Debug, Display, Formatter};

/// Length of a [Digest] in bytes.
pub const DIGEST_LENGTH: usize = 32;

/// Fingerprint uniquely identifying one immutable OCR configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    /// Create a new [Digest] from raw bytes.
    pub const fn new(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl From<[u8; DIGEST_LENGTH]> for Digest {
    fn from(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

/// One of the two report-producing pipelines run by a DON.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PluginType {
    Commit = 0,
    Exec = 1,
}

impl PluginType {
    /// All plugin types, in processing order.
    pub const ALL: [PluginType; 2] = [PluginType::Commit, PluginType::Exec];
}

impl TryFrom<u8> for PluginType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PluginType::Commit),
            1 => Ok(PluginType::Exec),
            other => Err(other),
        }
    }
}

impl From<PluginType> for u8 {
    fn from(plugin: PluginType) -> Self {
        plugin as u8
    }
}

impl Display for PluginType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginType::Commit => f.write_str("commit"),
            PluginType::Exec => f.write_str("exec"),
        }
    }
}

/// The kind of process an oracle handle runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Produces reports for a plugin pipeline.
    Plugin,
    /// Serves as a rendezvous point for the peers of a configuration.
    Bootstrap,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Plugin => f.write_str("plugin"),
            Role::Bootstrap => f.write_str("bootstrap"),
        }
    }
}

/// OCR configuration of one plugin pipeline on one DON.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OcrConfig {
    pub plugin_type: PluginType,

    /// Selector of the destination chain.
    pub chain_selector: u64,
    pub f: u8,
    pub offchain_config_version: u64,

    /// Address of the destination contract.
    pub offramp_address: Bytes,

    /// Peers that also run a bootstrap process for this configuration.
    ///
    /// Always a subset of `peers`.
    pub bootstrap_peers: Vec<PeerId>,

    /// Peers participating in the pipeline committee.
    pub peers: Vec<PeerId>,
    pub signers: Vec<Bytes>,
    pub transmitters: Vec<Bytes>,
    pub offchain_config: Bytes,
}

/// An [OcrConfig] together with the metadata assigned to it by the home chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OcrConfigWithMeta {
    pub config: OcrConfig,

    /// Incremented every time a configuration is set for the (DON, plugin) pair.
    pub config_count: u64,
    pub config_digest: Digest,
}
