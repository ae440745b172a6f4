//! Edge-node request handler.
//!
//! First hop for client requests: resolves policy, builds the split plan,
//! streams the local sub-plan over the body, hands the rest to the storage
//! node as request metadata, and persists the reversal record on writes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use prism_plan::{
    build, encode_handoff, decode_handoff, reversal_filters, ExecutionPlan, FilterInvocation,
    ReversalCodec, ReversalRecord, HANDOFF_HEADER, REVERSAL_SYSMETA,
};
use prism_policy::{Method, Phase, PolicyResolver, ResolveContext};
use prism_stream::{FilterChain, FilterExecutor, NativeRegistry};

use crate::config::EngineConfig;
use crate::error::{GatewayError, Result};
use crate::metrics::EngineMetrics;
use crate::request::{descriptor_from_headers, take_directive, StoreRequest, StoreResponse};
use crate::service::ObjectService;

/// The edge (proxy) handler. Stateless per request; all collaborators are
/// injected once at construction and shared across concurrent requests.
pub struct EdgeHandler {
    config: EngineConfig,
    resolver: Arc<PolicyResolver>,
    registry: Arc<NativeRegistry>,
    executor: Arc<dyn FilterExecutor>,
    upstream: Arc<dyn ObjectService>,
    metrics: Arc<EngineMetrics>,
}

impl EdgeHandler {
    pub fn new(
        config: EngineConfig,
        resolver: Arc<PolicyResolver>,
        registry: Arc<NativeRegistry>,
        executor: Arc<dyn FilterExecutor>,
        upstream: Arc<dyn ObjectService>,
    ) -> Self {
        Self {
            config,
            resolver,
            registry,
            executor,
            upstream,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    #[instrument(skip(self, req), fields(addr = %req.address))]
    async fn put(&self, mut req: StoreRequest) -> Result<StoreResponse> {
        let directive = take_directive(&mut req.headers)?;
        let descriptor = descriptor_from_headers(&req.address, &req.headers);
        let candidates = self
            .resolver
            .resolve(&req.address, Method::Put, &ResolveContext { descriptor, directive })
            .await?;
        let built = build(&candidates, self.config.node)?;

        if built.full.is_empty() {
            self.metrics.record_passthrough();
            return self.upstream.handle(req).await;
        }
        info!(filters = built.full.len(), "write goes through the filter pipeline");
        self.metrics.record_filtered();

        // The stored bytes will not match the client's checksum; remember the
        // original and keep the backend from verifying the transformed stream.
        let original_etag = req.headers.remove("etag");
        let original_size = req.headers.content_length();
        let record =
            ReversalRecord::new(original_etag.clone(), original_size, reversal_filters(&built.full));
        if !record.filters.is_empty() {
            self.metrics.record_reversal_persisted();
        }
        req.headers.set(REVERSAL_SYSMETA, ReversalCodec::encode(&record)?);

        let local_pre = built.local.for_phase(Phase::Pre);
        if !local_pre.is_empty() {
            let body = req.body.take().ok_or(GatewayError::MissingBody)?;
            let chain = FilterChain::build(
                &local_pre,
                body,
                &self.registry,
                self.executor.as_ref(),
                self.config.chain.clone(),
            )
            .await?;
            req.body = Some(Box::new(chain));
            // Length of the transformed stream is unknown up front.
            req.headers.remove("content-length");
            req.headers.set("transfer-encoding", "chunked");
        }

        if !built.remote.is_empty() {
            req.headers.set(HANDOFF_HEADER, encode_handoff(&built.remote)?);
            self.metrics.record_handoff();
        }

        let mut resp = self.upstream.handle(req).await?;
        // The backend's ETag is over transformed bytes; the client must see
        // its own.
        match original_etag {
            Some(etag) => resp.headers.set("etag", etag),
            None => {
                resp.headers.remove("etag");
            }
        }
        Ok(resp)
    }

    #[instrument(skip(self, req), fields(addr = %req.address))]
    async fn get(&self, mut req: StoreRequest) -> Result<StoreResponse> {
        let directive = take_directive(&mut req.headers)?;
        let descriptor = descriptor_from_headers(&req.address, &req.headers);
        let candidates = self
            .resolver
            .resolve(&req.address, Method::Get, &ResolveContext { descriptor, directive })
            .await?;
        let built = build(&candidates, self.config.node)?;

        if !built.remote.is_empty() {
            req.headers.set(HANDOFF_HEADER, encode_handoff(&built.remote)?);
            self.metrics.record_handoff();
        }

        let mut resp = self.upstream.handle(req).await?;
        if !resp.is_success() {
            return Ok(resp);
        }

        // The storage node leaves whatever is destined for this node in the
        // response metadata: reversal entries plus any leftover live filters.
        let handed = match resp.headers.remove(HANDOFF_HEADER) {
            Some(raw) => decode_handoff(&raw)?,
            None => ExecutionPlan::empty(),
        };

        let mut sequence: Vec<FilterInvocation> = handed.invocations;
        sequence.extend(built.local.for_phase(Phase::Post).invocations);
        if sequence.is_empty() {
            self.metrics.record_passthrough();
            return Ok(resp);
        }
        self.metrics.record_filtered();
        debug!(filters = sequence.len(), "read goes through the filter pipeline");

        let live_filters = sequence.iter().any(|inv| !inv.reverse);
        if let Some(body) = resp.body.take() {
            let chain = FilterChain::build(
                &ExecutionPlan::new(sequence),
                body,
                &self.registry,
                self.executor.as_ref(),
                self.config.chain.clone(),
            )
            .await?;
            resp.body = Some(Box::new(chain));
            if live_filters {
                // A live read filter changes the length arbitrarily; reversal
                // filters restore exactly the recorded original size.
                resp.headers.remove("content-length");
            }
        }
        Ok(resp)
    }
}

#[async_trait]
impl ObjectService for EdgeHandler {
    async fn handle(&self, req: StoreRequest) -> Result<StoreResponse> {
        self.metrics.record_request();
        match req.method {
            Method::Put => self.put(req).await,
            Method::Get => self.get(req).await,
            // Metadata-only methods resolve nothing here; restoration of
            // original size/ETag happens on the storage node.
            Method::Head | Method::Post | Method::Delete => self.upstream.handle(req).await,
        }
    }
}
