//! Sandboxed filter executor seam.
//!
//! Sandboxed filters run outside the pipeline engine — an isolated compute
//! runtime the engine only knows as a capability: give it a filter
//! descriptor and a byte stream, get a transformed byte stream back. The
//! capability must be safe for concurrent use by simultaneous requests.

use async_trait::async_trait;

use prism_plan::FilterInvocation;

use crate::error::StreamError;
use crate::source::ByteSource;

/// External execution capability for sandboxed filters.
#[async_trait]
pub trait FilterExecutor: Send + Sync {
    /// Wrap `input` with the sandboxed filter described by `invocation`.
    /// The returned source yields the transformed stream; closing it must
    /// close `input` exactly once.
    async fn invoke(
        &self,
        invocation: &FilterInvocation,
        input: Box<dyn ByteSource>,
    ) -> Result<Box<dyn ByteSource>, StreamError>;
}

/// Executor for nodes without a sandbox runtime: every invocation fails,
/// which surfaces misplaced sandboxed work instead of running it unisolated.
pub struct UnavailableExecutor;

#[async_trait]
impl FilterExecutor for UnavailableExecutor {
    async fn invoke(
        &self,
        invocation: &FilterInvocation,
        mut input: Box<dyn ByteSource>,
    ) -> Result<Box<dyn ByteSource>, StreamError> {
        input.close().await;
        Err(StreamError::Executor(format!(
            "no sandbox runtime on this node (wanted {})",
            invocation.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;
    use prism_policy::{ExecutionNode, FilterKind, Phase};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn unavailable_executor_closes_input_and_fails() {
        let invocation = FilterInvocation {
            id: "s".to_string(),
            name: "wordcount".to_string(),
            kind: FilterKind::Sandboxed,
            main: "wordcount-1.0.jar".to_string(),
            dependencies: Vec::new(),
            node: ExecutionNode::Storage,
            reverse_node: None,
            phase: Phase::Pre,
            order: 0,
            params: BTreeMap::new(),
            reverse: false,
        };
        let input = Box::new(VecSource::new(vec![1, 2, 3], 2));
        assert!(UnavailableExecutor.invoke(&invocation, input).await.is_err());
    }
}
