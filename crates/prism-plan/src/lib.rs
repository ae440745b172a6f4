#![warn(missing_docs)]

//! Prism plan subsystem: candidate ordering, node partitioning, inter-node
//! handoff and reversal metadata.
//!
//! The resolver's candidate list becomes an execution plan here: a stable
//! `(order, scope tier, rule id)` sort, a split into the sub-plan for this
//! node and the sub-plan handed to the other node as request metadata, and —
//! on writes — the reversal record persisted beside the stored object so a
//! later read can undo the transformation without consulting the policy
//! store.

pub mod builder;
pub mod error;
pub mod handoff;
pub mod plan;
pub mod reversal;

pub use builder::{build, merge_read_plan, reversal_filters, BuiltPlan};
pub use error::PlanError;
pub use handoff::{decode_handoff, encode_handoff, HANDOFF_HEADER};
pub use plan::{ExecutionPlan, FilterInvocation};
pub use reversal::{ReversalCodec, ReversalRecord, REVERSAL_SYSMETA};
