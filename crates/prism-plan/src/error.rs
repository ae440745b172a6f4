//! Error types for the prism-plan subsystem

/// All errors that can occur while building or serializing execution plans
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Two rules in the same scope tier claim the same execution order —
    /// executing an ambiguous plan risks silent data corruption
    #[error("duplicate execution order {order} within one scope tier: rules {first} and {second}")]
    DuplicateOrder {
        /// The contested order value
        order: i64,
        /// First rule id at that order
        first: String,
        /// Second rule id at that order
        second: String,
    },
    /// The inter-node handoff metadata could not be encoded or decoded
    #[error("handoff metadata invalid: {0}")]
    Handoff(String),
    /// The persisted reversal record could not be encoded or decoded
    #[error("reversal metadata invalid: {0}")]
    Reversal(String),
}
