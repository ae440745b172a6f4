//! Error types for the Prism gateway

use thiserror::Error;

use prism_plan::PlanError;
use prism_policy::PolicyError;
use prism_stream::StreamError;

/// Convenience alias used across the gateway.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Request-handling failures, mapped to service-level statuses by `status()`.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Policy lookup or resolution failed fatally.
    #[error("policy: {0}")]
    Policy(#[from] PolicyError),
    /// Plan building or plan metadata failed fatally.
    #[error("plan: {0}")]
    Plan(#[from] PlanError),
    /// The streaming chain failed (timeout, filter error, executor failure).
    #[error("stream: {0}")]
    Stream(#[from] StreamError),
    /// The backing object store failed.
    #[error("backend: {0}")]
    Backend(String),
    /// The engine configuration is invalid.
    #[error("configuration: {0}")]
    Config(String),
    /// A write arrived without a body to stream.
    #[error("request has no body to filter")]
    MissingBody,
    /// The single-filter directive or its parameter headers are malformed.
    #[error("bad filter directive: {0}")]
    BadDirective(String),
}

impl GatewayError {
    /// Service-level status for this failure. Every fatal class surfaces as a
    /// generic server error; malformed client input is the client's fault.
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::MissingBody | GatewayError::BadDirective(_) => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classes_are_server_errors() {
        let e = GatewayError::Policy(PolicyError::StoreUnavailable("down".to_string()));
        assert_eq!(e.status(), 500);
        let e = GatewayError::Stream(StreamError::Timeout { ms: 40_000 });
        assert_eq!(e.status(), 500);
        let e = GatewayError::Plan(PlanError::Handoff("bad".to_string()));
        assert_eq!(e.status(), 500);
    }

    #[test]
    fn client_faults_are_client_errors() {
        assert_eq!(GatewayError::MissingBody.status(), 400);
        assert_eq!(GatewayError::BadDirective("x".to_string()).status(), 400);
    }
}
