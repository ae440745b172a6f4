//! Storage-node request handler.
//!
//! Runs next to the stored object. It never re-resolves policy: writes
//! consume the sub-plan the edge handed off, reads recover the persisted
//! reversal record, merge it with any handed-off live plan, execute the
//! storage-destined part, and leave the rest in the response metadata for
//! the edge.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use prism_plan::{
    decode_handoff, encode_handoff, merge_read_plan, ExecutionPlan, FilterInvocation,
    ReversalCodec, ReversalRecord, HANDOFF_HEADER, REVERSAL_SYSMETA,
};
use prism_policy::{Method, Phase};
use prism_stream::{FilterChain, FilterExecutor, NativeRegistry};

use crate::config::EngineConfig;
use crate::error::{GatewayError, Result};
use crate::metrics::EngineMetrics;
use crate::request::{StoreRequest, StoreResponse};
use crate::service::ObjectService;

/// The storage (object) handler.
pub struct StorageHandler {
    config: EngineConfig,
    registry: Arc<NativeRegistry>,
    executor: Arc<dyn FilterExecutor>,
    backend: Arc<dyn ObjectService>,
    metrics: Arc<EngineMetrics>,
}

impl StorageHandler {
    pub fn new(
        config: EngineConfig,
        registry: Arc<NativeRegistry>,
        executor: Arc<dyn FilterExecutor>,
        backend: Arc<dyn ObjectService>,
    ) -> Self {
        Self {
            config,
            registry,
            executor,
            backend,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    fn take_handoff(&self, req: &mut StoreRequest) -> Result<ExecutionPlan> {
        match req.headers.remove(HANDOFF_HEADER) {
            Some(raw) => Ok(decode_handoff(&raw)?),
            None => Ok(ExecutionPlan::empty()),
        }
    }

    /// Decode the persisted reversal record, recovering from corruption by
    /// serving the object as stored.
    fn recover_record(&self, resp: &mut StoreResponse) -> Option<ReversalRecord> {
        let raw = resp.headers.remove(REVERSAL_SYSMETA)?;
        match ReversalCodec::decode(&raw) {
            Ok(record) => {
                self.metrics.record_reversal_recovered();
                Some(record)
            }
            Err(err) => {
                warn!(%err, "corrupt reversal metadata, serving the object as stored");
                self.metrics.record_reversal_decode_failure();
                None
            }
        }
    }

    fn restore_original_headers(resp: &mut StoreResponse, record: &ReversalRecord) {
        if let Some(etag) = &record.original_etag {
            resp.headers.set("etag", etag.clone());
        }
        if let Some(size) = record.original_size {
            resp.headers.set("content-length", size.to_string());
        }
    }

    #[instrument(skip(self, req), fields(addr = %req.address))]
    async fn put(&self, mut req: StoreRequest) -> Result<StoreResponse> {
        let handed = self.take_handoff(&mut req)?;
        let local: Vec<FilterInvocation> = handed
            .invocations
            .into_iter()
            .filter(|inv| inv.node == self.config.node && inv.phase == Phase::Pre)
            .collect();

        // Kept for the response: the backend checksums transformed bytes.
        let record = req
            .headers
            .get(REVERSAL_SYSMETA)
            .and_then(|raw| ReversalCodec::decode(raw).ok());

        if local.is_empty() {
            self.metrics.record_passthrough();
        } else {
            debug!(filters = local.len(), "write continues through handed-off filters");
            self.metrics.record_filtered();
            let body = req.body.take().ok_or(GatewayError::MissingBody)?;
            let chain = FilterChain::build(
                &ExecutionPlan::new(local),
                body,
                &self.registry,
                self.executor.as_ref(),
                self.config.chain.clone(),
            )
            .await?;
            req.body = Some(Box::new(chain));
            req.headers.remove("content-length");
            req.headers.set("transfer-encoding", "chunked");
        }

        let mut resp = self.backend.handle(req).await?;
        if let Some(record) = record {
            Self::restore_original_headers(&mut resp, &record);
        }
        Ok(resp)
    }

    #[instrument(skip(self, req), fields(addr = %req.address))]
    async fn get(&self, mut req: StoreRequest) -> Result<StoreResponse> {
        let handed = self.take_handoff(&mut req)?;
        let mut resp = self.backend.handle(req).await?;
        if !resp.is_success() {
            return Ok(resp);
        }

        let record = self.recover_record(&mut resp);
        if let Some(record) = &record {
            Self::restore_original_headers(&mut resp, record);
        }

        let reversal = record.map(|r| r.filters).unwrap_or_default();
        let merged = merge_read_plan(&reversal, &handed);
        if merged.is_empty() {
            self.metrics.record_passthrough();
            return Ok(resp);
        }

        let (local, remote): (Vec<_>, Vec<_>) = merged
            .invocations
            .into_iter()
            .partition(|inv| inv.node == self.config.node);

        if !remote.is_empty() {
            resp.headers
                .set(HANDOFF_HEADER, encode_handoff(&ExecutionPlan::new(remote))?);
            self.metrics.record_handoff();
        }

        if !local.is_empty() {
            self.metrics.record_filtered();
            debug!(filters = local.len(), "read goes through storage-side filters");
            if let Some(body) = resp.body.take() {
                let chain = FilterChain::build(
                    &ExecutionPlan::new(local),
                    body,
                    &self.registry,
                    self.executor.as_ref(),
                    self.config.chain.clone(),
                )
                .await?;
                resp.body = Some(Box::new(chain));
            }
        }
        Ok(resp)
    }

    async fn head(&self, req: StoreRequest) -> Result<StoreResponse> {
        let mut resp = self.backend.handle(req).await?;
        if resp.is_success() {
            if let Some(record) = self.recover_record(&mut resp) {
                Self::restore_original_headers(&mut resp, &record);
            }
        }
        Ok(resp)
    }
}

#[async_trait]
impl ObjectService for StorageHandler {
    async fn handle(&self, req: StoreRequest) -> Result<StoreResponse> {
        self.metrics.record_request();
        match req.method {
            Method::Put => self.put(req).await,
            Method::Get => self.get(req).await,
            Method::Head => self.head(req).await,
            Method::Post | Method::Delete => self.backend.handle(req).await,
        }
    }
}
