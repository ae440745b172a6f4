//! The stream filter chain.
//!
//! `FilterChain::build` composes an ordered list of filter invocations over a
//! source into a single pull-based stream: filter *i*'s output feeds filter
//! *i+1*'s input. The chain then fronts the composed stream with buffering,
//! bounded-time pulls and deterministic teardown.
//!
//! State machine per `read(max)` call:
//! `OPEN -> (buffer sufficient? serve : pull-and-filter-then-serve) ->
//! OPEN | CLOSED-EOF | CLOSED-ERROR`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use prism_plan::ExecutionPlan;
use prism_policy::FilterKind;

use crate::error::StreamError;
use crate::executor::FilterExecutor;
use crate::native::{NativeFilter, NativeRegistry};
use crate::source::ByteSource;

/// Chain tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Bound on each underlying pull, in milliseconds.
    pub read_timeout_ms: u64,
    /// Preferred chunk size for whole-stream reads.
    pub chunk_size: usize,
}

impl ChainConfig {
    /// Bound on each underlying pull.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 40_000,
            chunk_size: 64 * 1024,
        }
    }
}

/// Consumer-visible chain state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Serving data.
    Open,
    /// Source exhausted (or chain closed by the consumer); reads return
    /// empty, not errors.
    ClosedEof,
    /// Torn down after a timeout or filter failure; reads return errors.
    ClosedError,
}

/// One native filter layered over an upstream source.
struct NativeStage {
    inner: Box<dyn ByteSource>,
    filter: Box<dyn NativeFilter>,
    name: String,
    finished: bool,
    closed: bool,
}

impl NativeStage {
    fn new(inner: Box<dyn ByteSource>, filter: Box<dyn NativeFilter>, name: String) -> Self {
        Self {
            inner,
            filter,
            name,
            finished: false,
            closed: false,
        }
    }
}

#[async_trait]
impl ByteSource for NativeStage {
    async fn next_chunk(&mut self) -> Result<Bytes, StreamError> {
        if self.finished {
            return Ok(Bytes::new());
        }
        // A buffering filter may produce nothing for a given input chunk;
        // keep pulling until there is output or the upstream ends.
        loop {
            let chunk = self.inner.next_chunk().await?;
            if chunk.is_empty() {
                self.finished = true;
                let tail = self.filter.finish()?;
                return Ok(Bytes::from(tail));
            }
            let out = self.filter.transform(&chunk)?;
            if !out.is_empty() {
                return Ok(Bytes::from(out));
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.close().await;
        }
    }
}

impl std::fmt::Debug for NativeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeStage")
            .field("name", &self.name)
            .field("finished", &self.finished)
            .finish()
    }
}

/// A composed filter chain fronting a byte stream.
pub struct FilterChain {
    source: Option<Box<dyn ByteSource>>,
    buffer: BytesMut,
    state: ChainState,
    config: ChainConfig,
}

impl FilterChain {
    /// Compose `plan` over `source`. Native invocations come from `registry`
    /// (validated up front, so an unregistered entry point fails before any
    /// byte moves); sandboxed ones delegate to `executor`.
    pub async fn build(
        plan: &ExecutionPlan,
        source: Box<dyn ByteSource>,
        registry: &NativeRegistry,
        executor: &dyn FilterExecutor,
        config: ChainConfig,
    ) -> Result<Self, StreamError> {
        registry.validate(plan)?;

        let mut current = source;
        for invocation in plan.iter() {
            match invocation.kind {
                FilterKind::Native => {
                    let filter = match registry.instantiate(invocation) {
                        Ok(f) => f,
                        Err(e) => {
                            current.close().await;
                            return Err(e);
                        }
                    };
                    debug!(filter = %invocation.name, reverse = invocation.reverse, "native stage attached");
                    current = Box::new(NativeStage::new(current, filter, invocation.name.clone()));
                }
                FilterKind::Sandboxed => {
                    debug!(filter = %invocation.name, "delegating to sandboxed executor");
                    current = executor.invoke(invocation, current).await?;
                }
            }
        }

        Ok(Self {
            source: Some(current),
            buffer: BytesMut::new(),
            state: ChainState::Open,
            config,
        })
    }

    /// Chain with no filters, plumbing only.
    pub fn passthrough(source: Box<dyn ByteSource>, config: ChainConfig) -> Self {
        Self {
            source: Some(source),
            buffer: BytesMut::new(),
            state: ChainState::Open,
            config,
        }
    }

    /// Current state.
    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Pull up to `max` bytes. Empty result means end of stream.
    pub async fn read(&mut self, max: usize) -> Result<Bytes, StreamError> {
        match self.state {
            ChainState::ClosedEof => return Ok(Bytes::new()),
            ChainState::ClosedError => return Err(StreamError::Closed),
            ChainState::Open => {}
        }
        if max == 0 {
            return Ok(Bytes::new());
        }

        while self.buffer.is_empty() {
            let Some(source) = self.source.as_mut() else {
                self.state = ChainState::ClosedEof;
                return Ok(Bytes::new());
            };
            match timeout(self.config.read_timeout(), source.next_chunk()).await {
                Err(_) => {
                    let ms = self.config.read_timeout_ms;
                    warn!(ms, "pull exceeded the read bound, tearing the chain down");
                    self.teardown(ChainState::ClosedError).await;
                    return Err(StreamError::Timeout { ms });
                }
                Ok(Err(e)) => {
                    self.teardown(ChainState::ClosedError).await;
                    return Err(e);
                }
                Ok(Ok(chunk)) if chunk.is_empty() => {
                    self.teardown(ChainState::ClosedEof).await;
                    return Ok(Bytes::new());
                }
                Ok(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
            }
        }

        let n = max.min(self.buffer.len());
        Ok(self.buffer.split_to(n).freeze())
    }

    /// Read until (and including) the next `\n`, end of stream, or `max`
    /// bytes. Built strictly on `read`, so it honors the same bounds and
    /// stops consuming once a closing condition occurs.
    pub async fn read_line(&mut self, max: usize) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        while out.len() < max {
            let chunk = self.read(max - out.len()).await?;
            if chunk.is_empty() {
                break;
            }
            if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
                out.extend_from_slice(&chunk[..=pos]);
                let rest = chunk.slice(pos + 1..);
                if !rest.is_empty() {
                    // Hand the overshoot back for the next read.
                    let mut reclaimed = BytesMut::with_capacity(rest.len() + self.buffer.len());
                    reclaimed.extend_from_slice(&rest);
                    reclaimed.extend_from_slice(&self.buffer);
                    self.buffer = reclaimed;
                }
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Drain the stream to completion.
    pub async fn read_all(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        loop {
            let chunk = self.read(self.config.chunk_size).await?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
        }
    }

    /// Close the chain. Idempotent: the underlying source is released at most
    /// once, through however many stages wrap it.
    pub async fn close(&mut self) {
        let next = match self.state {
            ChainState::ClosedError => ChainState::ClosedError,
            _ => ChainState::ClosedEof,
        };
        self.teardown(next).await;
    }

    async fn teardown(&mut self, state: ChainState) {
        if let Some(mut source) = self.source.take() {
            source.close().await;
        }
        self.buffer.clear();
        self.state = state;
    }
}

// A chain is itself a source, so a wrapped body can be spliced back into a
// request or response wherever a plain stream is expected.
#[async_trait]
impl ByteSource for FilterChain {
    async fn next_chunk(&mut self) -> Result<Bytes, StreamError> {
        self.read(self.config.chunk_size).await
    }

    async fn close(&mut self) {
        FilterChain::close(self).await;
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChannelSource, VecSource};
    use prism_plan::FilterInvocation;
    use prism_policy::{ExecutionNode, Phase};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn invocation(main: &str, kind: FilterKind, reverse: bool) -> FilterInvocation {
        FilterInvocation {
            id: main.to_string(),
            name: main.to_string(),
            kind,
            main: main.to_string(),
            dependencies: Vec::new(),
            node: ExecutionNode::Edge,
            reverse_node: None,
            phase: Phase::Pre,
            order: 0,
            params: BTreeMap::new(),
            reverse,
        }
    }

    fn crypt_invocation(reverse: bool) -> FilterInvocation {
        let mut inv = invocation("crypt", FilterKind::Native, reverse);
        inv.params.insert("secret".to_string(), "k".to_string());
        inv
    }

    struct ByteMap(fn(u8) -> u8);

    impl NativeFilter for ByteMap {
        fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>, StreamError> {
            Ok(chunk.iter().map(|&b| (self.0)(b)).collect())
        }
        fn finish(&mut self) -> Result<Vec<u8>, StreamError> {
            Ok(Vec::new())
        }
    }

    fn test_registry() -> NativeRegistry {
        let mut registry = NativeRegistry::with_builtins();
        registry.register("xor-aa", Arc::new(|_| {
            Ok(Box::new(ByteMap(|b| b ^ 0xAA)) as Box<dyn NativeFilter>)
        }));
        registry.register("plus-one", Arc::new(|_| {
            Ok(Box::new(ByteMap(|b| b.wrapping_add(1))) as Box<dyn NativeFilter>)
        }));
        registry
    }

    async fn build_chain(plan: Vec<FilterInvocation>, data: Vec<u8>) -> FilterChain {
        let registry = test_registry();
        FilterChain::build(
            &ExecutionPlan::new(plan),
            Box::new(VecSource::new(data, 1024)),
            &registry,
            &crate::executor::UnavailableExecutor,
            ChainConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn empty_plan_passes_bytes_through() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut chain = build_chain(vec![], data.clone()).await;
        assert_eq!(chain.read_all().await.unwrap(), data);
        assert_eq!(chain.state(), ChainState::ClosedEof);
    }

    #[tokio::test]
    async fn filters_compose_in_plan_order() {
        let data = vec![0u8, 1, 2, 250];
        let plan = vec![
            invocation("xor-aa", FilterKind::Native, false),
            invocation("plus-one", FilterKind::Native, false),
        ];
        let mut chain = build_chain(plan, data.clone()).await;
        let out = chain.read_all().await.unwrap();
        let expected: Vec<u8> = data.iter().map(|&b| (b ^ 0xAA).wrapping_add(1)).collect();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn chunked_reads_concatenate_to_the_full_transform() {
        let data: Vec<u8> = (0..5_000u32).map(|i| (i % 199) as u8).collect();
        let plan = vec![invocation("xor-aa", FilterKind::Native, false)];
        let mut chain = build_chain(plan, data.clone()).await;

        let mut out = Vec::new();
        loop {
            let chunk = chain.read(97).await.unwrap();
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= 97);
            out.extend_from_slice(&chunk);
        }
        let expected: Vec<u8> = data.iter().map(|&b| b ^ 0xAA).collect();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn compress_then_crypt_reverses_byte_exact() {
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 17) as u8).collect();
        let write_plan = vec![
            invocation("compress", FilterKind::Native, false),
            crypt_invocation(false),
        ];
        let mut write_chain = build_chain(write_plan, data.clone()).await;
        let stored = write_chain.read_all().await.unwrap();
        assert_ne!(stored, data);

        // Undo in reverse order: decrypt, then decompress.
        let read_plan = vec![
            crypt_invocation(true),
            invocation("compress", FilterKind::Native, true),
        ];
        let mut read_chain = build_chain(read_plan, stored).await;
        assert_eq!(read_chain.read_all().await.unwrap(), data);
    }

    #[tokio::test]
    async fn eof_is_sticky_and_not_an_error() {
        let mut chain = build_chain(vec![], b"ab".to_vec()).await;
        assert_eq!(chain.read(10).await.unwrap(), Bytes::from_static(b"ab"));
        assert!(chain.read(10).await.unwrap().is_empty());
        assert!(chain.read(10).await.unwrap().is_empty());
        assert_eq!(chain.state(), ChainState::ClosedEof);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_pull_times_out_and_never_serves_again() {
        let (_tx, source) = ChannelSource::pair(1);
        let mut chain = FilterChain::passthrough(
            Box::new(source),
            ChainConfig {
                read_timeout_ms: 50,
                chunk_size: 1024,
            },
        );
        assert!(matches!(
            chain.read(10).await,
            Err(StreamError::Timeout { ms: 50 })
        ));
        assert_eq!(chain.state(), ChainState::ClosedError);
        assert!(matches!(chain.read(10).await, Err(StreamError::Closed)));
    }

    #[tokio::test]
    async fn filter_error_tears_the_chain_down() {
        // Reverse crypt over plain bytes: not a valid frame once EOF hits.
        let plan = vec![crypt_invocation(true)];
        let mut chain = build_chain(plan, b"definitely not ciphertext".to_vec()).await;
        assert!(chain.read_all().await.is_err());
        assert_eq!(chain.state(), ChainState::ClosedError);
        assert!(matches!(chain.read(10).await, Err(StreamError::Closed)));
    }

    struct CountingSource {
        inner: VecSource,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ByteSource for CountingSource {
        async fn next_chunk(&mut self) -> Result<Bytes, StreamError> {
            self.inner.next_chunk().await
        }
        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close().await;
        }
    }

    #[tokio::test]
    async fn close_releases_the_source_exactly_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            inner: VecSource::new(vec![1u8; 100], 10),
            closes: closes.clone(),
        };
        let registry = test_registry();
        let plan = ExecutionPlan::new(vec![
            invocation("xor-aa", FilterKind::Native, false),
            invocation("plus-one", FilterKind::Native, false),
        ]);
        let mut chain = FilterChain::build(
            &plan,
            Box::new(source),
            &registry,
            &crate::executor::UnavailableExecutor,
            ChainConfig::default(),
        )
        .await
        .unwrap();

        chain.close().await;
        chain.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(chain.state(), ChainState::ClosedEof);
    }

    #[tokio::test]
    async fn unknown_native_fails_before_any_byte_moves() {
        let registry = test_registry();
        let plan = ExecutionPlan::new(vec![invocation("missing", FilterKind::Native, false)]);
        let result = FilterChain::build(
            &plan,
            Box::new(VecSource::new(vec![1u8; 10], 4)),
            &registry,
            &crate::executor::UnavailableExecutor,
            ChainConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(StreamError::UnknownFilter(_))));
    }

    #[tokio::test]
    async fn read_line_stops_at_newline_and_keeps_the_rest() {
        let mut chain = build_chain(vec![], b"first\nsecond\nlast".to_vec()).await;
        assert_eq!(chain.read_line(1024).await.unwrap(), b"first\n");
        assert_eq!(chain.read_line(1024).await.unwrap(), b"second\n");
        assert_eq!(chain.read_line(1024).await.unwrap(), b"last");
        assert!(chain.read_line(1024).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_line_honors_the_size_bound() {
        let mut chain = build_chain(vec![], b"0123456789\n".to_vec()).await;
        assert_eq!(chain.read_line(4).await.unwrap(), b"0123");
    }

    struct UppercaseExecutor;

    #[async_trait]
    impl FilterExecutor for UppercaseExecutor {
        async fn invoke(
            &self,
            _invocation: &FilterInvocation,
            input: Box<dyn ByteSource>,
        ) -> Result<Box<dyn ByteSource>, StreamError> {
            Ok(Box::new(NativeStage::new(
                input,
                Box::new(ByteMap(|b| b.to_ascii_uppercase())),
                "uppercase".to_string(),
            )))
        }
    }

    #[tokio::test]
    async fn sandboxed_stages_delegate_to_the_executor() {
        let registry = test_registry();
        let plan = ExecutionPlan::new(vec![invocation("wc-1.0.jar", FilterKind::Sandboxed, false)]);
        let mut chain = FilterChain::build(
            &plan,
            Box::new(VecSource::new(b"hello".to_vec(), 2)),
            &registry,
            &UppercaseExecutor,
            ChainConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(chain.read_all().await.unwrap(), b"HELLO");
    }
}
