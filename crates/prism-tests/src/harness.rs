//! Two-node test harness: edge handler → storage handler → in-memory store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use prism_gateway::{
    EdgeHandler, EngineConfig, Headers, MemoryStore, ObjectService, ServiceProbe, StorageHandler,
    StoreRequest, StoreResponse,
};
use prism_plan::FilterInvocation;
use prism_policy::{
    ExecutionNode, MemoryRuleStore, Method, ObjectAddress, PolicyResolver, RuleStore,
};
use prism_stream::{ByteSource, FilterExecutor, NativeRegistry, StreamError, VecSource};

/// One sandbox invocation observed by the [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCall {
    pub name: String,
    pub node: ExecutionNode,
    pub reverse: bool,
}

/// Stand-in sandbox runtime: passes bytes through untouched and records every
/// invocation so tests can assert where and in which direction filters ran.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<SandboxCall>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SandboxCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl FilterExecutor for RecordingExecutor {
    async fn invoke(
        &self,
        invocation: &FilterInvocation,
        input: Box<dyn ByteSource>,
    ) -> Result<Box<dyn ByteSource>, StreamError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SandboxCall {
                name: invocation.name.clone(),
                node: invocation.node,
                reverse: invocation.reverse,
            });
        Ok(input)
    }
}

/// A stacked two-node deployment over shared rule and object stores.
pub struct TestCluster {
    pub rules: Arc<MemoryRuleStore>,
    pub backend: Arc<MemoryStore>,
    pub executor: Arc<RecordingExecutor>,
    pub storage: Arc<StorageHandler>,
    pub edge: Arc<EdgeHandler>,
}

impl TestCluster {
    pub fn new() -> Self {
        let rules = Arc::new(MemoryRuleStore::new());
        let backend = Arc::new(MemoryStore::new());
        let registry = Arc::new(NativeRegistry::with_builtins());
        let executor = Arc::new(RecordingExecutor::new());

        let storage = Arc::new(StorageHandler::new(
            EngineConfig::storage(),
            registry.clone(),
            executor.clone(),
            backend.clone(),
        ));
        let probe = ServiceProbe::new(storage.clone());
        let rule_store: Arc<dyn RuleStore> = rules.clone();
        let resolver = Arc::new(PolicyResolver::new(rule_store).with_probe(Arc::new(probe)));
        let edge = Arc::new(EdgeHandler::new(
            EngineConfig::edge(),
            resolver,
            registry,
            executor.clone(),
            storage.clone(),
        ));

        Self {
            rules,
            backend,
            executor,
            storage,
            edge,
        }
    }

    pub fn addr(&self) -> ObjectAddress {
        ObjectAddress::new("AUTH_test", "photos", "trip.raw")
    }

    pub async fn put(&self, headers: Headers, data: &[u8]) -> StoreResponse {
        let req = StoreRequest::new(Method::Put, self.addr())
            .with_headers(headers)
            .with_body(Box::new(VecSource::new(data.to_vec(), 4096)));
        self.edge.handle(req).await.expect("put failed")
    }

    pub async fn get(&self) -> (StoreResponse, Vec<u8>) {
        let mut resp = self
            .edge
            .handle(StoreRequest::new(Method::Get, self.addr()))
            .await
            .expect("get failed");
        let body = match resp.body.take() {
            Some(mut source) => drain(source.as_mut()).await,
            None => Vec::new(),
        };
        (resp, body)
    }

    pub async fn head(&self) -> StoreResponse {
        self.edge
            .handle(StoreRequest::new(Method::Head, self.addr()))
            .await
            .expect("head failed")
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a fmt subscriber for debugging a failing scenario
/// (`RUST_LOG=prism_policy=debug,prism_stream=trace …`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Pull a source to completion.
pub async fn drain(source: &mut dyn ByteSource) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let chunk = source.next_chunk().await.expect("source failed");
        if chunk.is_empty() {
            return out;
        }
        out.extend_from_slice(&chunk);
    }
}

/// A native rule record in the store's wire shape, firing on pre-PUT.
pub fn native_rule(
    main: &str,
    server: &str,
    reverse: Option<&str>,
    order: i64,
    params: &[(&str, &str)],
) -> Value {
    let params: BTreeMap<String, String> = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    json!({
        "name": main,
        "main": main,
        "filter_type": "native",
        "execution_server": server,
        "execution_server_reverse": reverse,
        "has_reverse": reverse.is_some(),
        "execution_order": order,
        "is_pre_put": true,
        "params": params,
    })
}

/// A sandboxed rule record, firing on pre-PUT.
pub fn sandboxed_rule(name: &str, server: &str, reverse: Option<&str>, order: i64) -> Value {
    json!({
        "name": name,
        "main": format!("{name}-1.0.jar"),
        "filter_type": "storlet",
        "execution_server": server,
        "execution_server_reverse": reverse,
        "has_reverse": reverse.is_some(),
        "execution_order": order,
        "is_pre_put": true,
        "dependencies": "commons",
    })
}
