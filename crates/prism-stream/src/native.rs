//! Native filters and the capability registry.
//!
//! Native filters are in-process, chunk-wise byte transforms. Rules select an
//! implementation by entry-point name; the registry maps names to
//! constructors at load time, so an unregistered name fails fast at plan
//! validation instead of mid-stream.

use std::collections::HashMap;
use std::sync::Arc;

use prism_plan::{ExecutionPlan, FilterInvocation};
use prism_policy::FilterKind;

use crate::compress::CompressFilter;
use crate::crypt::CryptFilter;
use crate::error::StreamError;

/// A chunk-wise byte transform.
///
/// `transform` is called once per non-empty input chunk and may return empty
/// output while buffering; `finish` is called exactly once at end of stream
/// and flushes whatever the filter still holds.
pub trait NativeFilter: Send {
    /// Transform one input chunk.
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>, StreamError>;

    /// Flush buffered state at end of stream.
    fn finish(&mut self) -> Result<Vec<u8>, StreamError>;
}

/// Passthrough filter; useful for wiring checks and latency probes.
#[derive(Debug, Default)]
pub struct IdentityFilter;

impl NativeFilter for IdentityFilter {
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>, StreamError> {
        Ok(chunk.to_vec())
    }

    fn finish(&mut self) -> Result<Vec<u8>, StreamError> {
        Ok(Vec::new())
    }
}

/// Constructor for a native filter, fed the resolved invocation.
pub type NativeConstructor =
    Arc<dyn Fn(&FilterInvocation) -> Result<Box<dyn NativeFilter>, StreamError> + Send + Sync>;

/// Capability table mapping entry-point names to native filter constructors.
///
/// Shared read-only across concurrent requests.
pub struct NativeRegistry {
    constructors: HashMap<String, NativeConstructor>,
}

impl NativeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the built-in filters: `identity`, `compress`, `crypt`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("identity", Arc::new(|_inv| {
            Ok(Box::new(IdentityFilter) as Box<dyn NativeFilter>)
        }));
        registry.register("compress", Arc::new(|inv| {
            Ok(Box::new(CompressFilter::from_invocation(inv)?) as Box<dyn NativeFilter>)
        }));
        registry.register("crypt", Arc::new(|inv| {
            Ok(Box::new(CryptFilter::from_invocation(inv)?) as Box<dyn NativeFilter>)
        }));
        registry
    }

    /// Register (or replace) a constructor under an entry-point name.
    pub fn register(&mut self, name: &str, constructor: NativeConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    /// True when `name` has a registered implementation.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Instantiate the filter for one invocation.
    pub fn instantiate(
        &self,
        invocation: &FilterInvocation,
    ) -> Result<Box<dyn NativeFilter>, StreamError> {
        let constructor = self
            .constructors
            .get(&invocation.main)
            .ok_or_else(|| StreamError::UnknownFilter(invocation.main.clone()))?;
        constructor(invocation)
    }

    /// Check every native invocation in `plan` against the table. Called at
    /// plan time so a missing implementation surfaces before any byte moves.
    pub fn validate(&self, plan: &ExecutionPlan) -> Result<(), StreamError> {
        for invocation in plan.iter() {
            if invocation.kind == FilterKind::Native && !self.contains(&invocation.main) {
                return Err(StreamError::UnknownFilter(invocation.main.clone()));
            }
        }
        Ok(())
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
