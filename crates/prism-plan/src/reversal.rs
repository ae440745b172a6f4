//! Reversal metadata codec.
//!
//! After a write-time transformation, the stored object carries one sidecar
//! metadata field: the original ETag and size plus the filters that must be
//! undone on read. Encoding is strict JSON — decoding never evaluates
//! anything and fails explicitly on corrupt input; the read path treats a
//! failed decode as "no reversal plan" and serves the object as stored.

use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::plan::FilterInvocation;

/// Metadata field on the stored object holding the encoded record.
pub const REVERSAL_SYSMETA: &str = "x-object-sysmeta-prism";

/// Persisted beside a stored object after a PUT-time transformation.
/// Created at PUT completion, read at GET/HEAD, never mutated, superseded
/// wholesale by the next successful PUT.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReversalRecord {
    /// Client-declared ETag before transformation, if any.
    pub original_etag: Option<String>,
    /// Object size in bytes before transformation, if declared.
    pub original_size: Option<u64>,
    /// Filters to undo on read, node and phase already rewritten.
    pub filters: Vec<FilterInvocation>,
}

impl ReversalRecord {
    /// Record for one completed write.
    pub fn new(
        original_etag: Option<String>,
        original_size: Option<u64>,
        filters: Vec<FilterInvocation>,
    ) -> Self {
        Self {
            original_etag,
            original_size,
            filters,
        }
    }
}

/// Bit-exact encoder/decoder for [`ReversalRecord`].
pub struct ReversalCodec;

impl ReversalCodec {
    /// Encode a record for storage. `decode(encode(x)) == x` for every valid
    /// record.
    pub fn encode(record: &ReversalRecord) -> Result<String, PlanError> {
        serde_json::to_string(record).map_err(|e| PlanError::Reversal(e.to_string()))
    }

    /// Decode a stored record. Corrupt input is an error, never a panic and
    /// never partial data.
    pub fn decode(raw: &str) -> Result<ReversalRecord, PlanError> {
        serde_json::from_str(raw).map_err(|e| PlanError::Reversal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_policy::{ExecutionNode, FilterKind, Phase};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn sample_filters() -> Vec<FilterInvocation> {
        vec![FilterInvocation {
            id: "crypt".to_string(),
            name: "crypt".to_string(),
            kind: FilterKind::Native,
            main: "crypt".to_string(),
            dependencies: Vec::new(),
            node: ExecutionNode::Edge,
            reverse_node: None,
            phase: Phase::Post,
            order: 1,
            params: BTreeMap::from([("secret".to_string(), "k".to_string())]),
            reverse: true,
        }]
    }

    #[test]
    fn round_trips_exactly() {
        let record = ReversalRecord::new(
            Some("d41d8cd98f00b204e9800998ecf8427e".to_string()),
            Some(10_240),
            sample_filters(),
        );
        let decoded = ReversalCodec::decode(&ReversalCodec::encode(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn round_trips_empty_record() {
        let record = ReversalRecord::default();
        let decoded = ReversalCodec::decode(&ReversalCodec::encode(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn corrupt_input_is_an_error() {
        assert!(ReversalCodec::decode("").is_err());
        assert!(ReversalCodec::decode("{\"original_etag\":").is_err());
        assert!(ReversalCodec::decode("[1,2,3]").is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = "{\"original_etag\":null,\"original_size\":null,\"filters\":[],\"extra\":1}";
        assert!(ReversalCodec::decode(raw).is_err());
    }

    proptest! {
        #[test]
        fn prop_etag_and_size_round_trip(
            etag in proptest::option::of("[a-f0-9]{1,64}"),
            size in proptest::option::of(0u64..u64::MAX),
        ) {
            let record = ReversalRecord::new(etag, size, sample_filters());
            let decoded = ReversalCodec::decode(&ReversalCodec::encode(&record).unwrap()).unwrap();
            prop_assert_eq!(decoded, record);
        }
    }
}
