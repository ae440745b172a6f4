//! Prism test infrastructure.
//!
//! A two-node harness (edge handler stacked over a storage handler over the
//! in-memory store) plus end-to-end scenarios exercising the full pipeline:
//! policy resolution, plan split and handoff, streaming transformation,
//! reversal persistence and recovery.

pub mod harness;
pub mod scenarios;

pub use harness::{
    drain, init_tracing, native_rule, sandboxed_rule, RecordingExecutor, SandboxCall, TestCluster,
};
