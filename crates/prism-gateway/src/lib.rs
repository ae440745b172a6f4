//! Prism gateway: per-node request handlers for the dynamic filter pipeline.
//!
//! An edge handler and a storage handler stack over any [`ObjectService`]
//! (the in-memory store here, the real backend in production), wiring
//! resolver → plan builder → stream chain around each object request:
//!
//! PUT:  resolve → split plan → persist reversal sysmeta, suppress ETag →
//!       wrap body locally → hand remainder to the storage node → store
//! GET:  resolve → hand storage sub-plan down → storage recovers the
//!       reversal record, restores ETag/size, runs its part → edge runs the
//!       entries handed back → client sees the original bytes

pub mod address;
pub mod config;
pub mod edge;
pub mod error;
pub mod metrics;
pub mod request;
pub mod service;
pub mod storage;
pub mod store;

pub use address::{parse_edge_path, parse_storage_path, ParsedPath, RequestAddress};
pub use config::EngineConfig;
pub use edge::EdgeHandler;
pub use error::{GatewayError, Result};
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};
pub use request::{
    descriptor_from_headers, take_directive, Headers, StoreRequest, StoreResponse,
    PARAMETER_PREFIX, RUN_FILTER_HEADER, TAG_PREFIX,
};
pub use service::{ObjectService, ServiceProbe};
pub use storage::StorageHandler;
pub use store::MemoryStore;
