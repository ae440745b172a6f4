//! Side-channel metadata probe.
//!
//! Conditions over content type, tags or size need object metadata that the
//! request itself may not carry (GET/HEAD/POST/DELETE). The resolver performs
//! at most one probe per request through this capability; a failing probe
//! excludes only the rules that needed it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::store::ObjectAddress;

/// Metadata returned by a probe (typically a backend HEAD).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Stored content type.
    pub content_type: Option<String>,
    /// Stored object size in bytes.
    pub content_length: Option<u64>,
    /// Stored tag key/value pairs.
    pub tags: BTreeMap<String, String>,
    /// Stored ETag.
    pub etag: Option<String>,
}

/// One-shot metadata read for condition evaluation.
#[async_trait]
pub trait MetadataProbe: Send + Sync {
    /// Fetch metadata for `addr`.
    async fn probe(&self, addr: &ObjectAddress) -> Result<ObjectMetadata, PolicyError>;
}

/// Probe that always fails; for deployments where no side channel exists.
/// Rules whose conditions need metadata are then excluded.
pub struct NoProbe;

#[async_trait]
impl MetadataProbe for NoProbe {
    async fn probe(&self, addr: &ObjectAddress) -> Result<ObjectMetadata, PolicyError> {
        Err(PolicyError::Probe(format!(
            "no metadata probe configured (wanted {addr})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_probe_fails() {
        let addr = ObjectAddress::new("a", "c", "o");
        assert!(NoProbe.probe(&addr).await.is_err());
    }
}
