//! Error types for the prism-policy subsystem

/// All errors that can occur during policy lookup and resolution
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Rule store unreachable or returned a protocol-level failure — fatal for the request
    #[error("rule store unavailable: {0}")]
    StoreUnavailable(String),
    /// A rule record could not be decoded; the rule is excluded, the request continues
    #[error("malformed rule {id}: {reason}")]
    MalformedRule {
        /// Id of the offending rule within its scope
        id: String,
        /// What failed to decode
        reason: String,
    },
    /// A condition clause could not be evaluated; the rule is excluded, the request continues
    #[error("condition evaluation failed: {0}")]
    Condition(String),
    /// The side-channel metadata probe failed; rules needing metadata are excluded
    #[error("metadata probe failed: {0}")]
    Probe(String),
}
