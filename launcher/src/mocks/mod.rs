//! Mock implementations of the launcher's collaborators.

use crate::{Digest, OcrConfig, OcrConfigWithMeta, PluginType};
use bytes::Bytes;
use don_registry::PeerId;
use thiserror::Error;

pub mod factory;
pub use factory::{Factory, Oracle};
pub mod supplier;
pub use supplier::Supplier;

/// Errors injected by the mocks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("injected create failure")]
    Create,
    #[error("injected start failure")]
    Start,
    #[error("injected close failure")]
    Close,
    #[error("injected fetch failure")]
    Fetch,
    #[error("not ready")]
    NotReady,
}

/// Construct an [OcrConfigWithMeta] identified by `digest`.
///
/// The config count is derived from the first byte of the digest so that configurations built
/// with increasing digests are also increasingly recent.
pub fn ocr_config(
    plugin: PluginType,
    digest: Digest,
    peers: Vec<PeerId>,
    bootstrap_peers: Vec<PeerId>,
) -> OcrConfigWithMeta {
    OcrConfigWithMeta {
        config: OcrConfig {
            plugin_type: plugin,
            chain_selector: 1,
            f: 1,
            offchain_config_version: 1,
            offramp_address: Bytes::from_static(&[0xaa; 20]),
            signers: peers
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_ref()))
                .collect(),
            transmitters: peers
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_ref()))
                .collect(),
            bootstrap_peers,
            peers,
            offchain_config: Bytes::new(),
        },
        config_count: digest.as_ref()[0] as u64,
        config_digest: digest,
    }
}
