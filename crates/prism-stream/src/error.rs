//! Error types for the prism-stream subsystem

/// All errors that can occur while streaming through a filter chain
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// An underlying pull exceeded the configured bound; the chain is torn down
    #[error("read timed out after {ms}ms")]
    Timeout {
        /// The configured bound in milliseconds
        ms: u64,
    },
    /// A filter transform failed; fatal for the in-flight request
    #[error("filter {name} failed: {reason}")]
    Filter {
        /// Filter name
        name: String,
        /// What went wrong
        reason: String,
    },
    /// The sandboxed executor reported a failure
    #[error("sandboxed executor failed: {0}")]
    Executor(String),
    /// A native rule names an entry point with no registered implementation
    #[error("no registered native filter for entry point {0:?}")]
    UnknownFilter(String),
    /// A filter's parameter map is missing or malformed
    #[error("bad parameters for filter {name}: {reason}")]
    BadParams {
        /// Filter name
        name: String,
        /// What is wrong with the params
        reason: String,
    },
    /// The underlying byte source failed
    #[error("source failed: {0}")]
    Source(String),
    /// The chain was already torn down by an earlier error
    #[error("stream closed after earlier failure")]
    Closed,
}
