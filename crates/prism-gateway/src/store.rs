//! In-memory terminal object store.
//!
//! The last service in a stack for tests and single-node development.
//! Persists bodies plus `x-object-sysmeta-*` / `x-object-meta-*` headers and
//! computes a BLAKE3 ETag over the stored bytes, the way the real backend
//! checksums what it actually wrote (which is the transformed stream when
//! filters ran).

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use prism_policy::Method;
use prism_stream::VecSource;

use crate::error::{GatewayError, Result};
use crate::request::{StoreRequest, StoreResponse, TAG_PREFIX};
use crate::service::ObjectService;

const SYSMETA_PREFIX: &str = "x-object-sysmeta-";
const BODY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    etag: String,
    content_type: Option<String>,
    metadata: BTreeMap<String, String>,
}

/// Thread-safe in-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored bytes, for assertions on what actually landed on disk.
    pub fn stored_bytes(&self, path: &str) -> Option<Vec<u8>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.get(path).map(|o| o.data.clone())
    }

    /// A persisted metadata field of a stored object.
    pub fn stored_metadata(&self, path: &str, name: &str) -> Option<String> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .get(path)
            .and_then(|o| o.metadata.get(&name.to_ascii_lowercase()).cloned())
    }

    async fn put(&self, mut req: StoreRequest) -> Result<StoreResponse> {
        let mut data = Vec::new();
        if let Some(body) = req.body.as_mut() {
            loop {
                let chunk = body
                    .next_chunk()
                    .await
                    .map_err(|e| GatewayError::Backend(format!("draining body: {e}")))?;
                if chunk.is_empty() {
                    break;
                }
                data.extend_from_slice(&chunk);
            }
            body.close().await;
        }

        let mut metadata = BTreeMap::new();
        for (name, value) in req.headers.iter() {
            if name.starts_with(SYSMETA_PREFIX) || name.starts_with(TAG_PREFIX) {
                metadata.insert(name.to_string(), value.to_string());
            }
        }

        let etag = blake3::hash(&data).to_hex().to_string();
        let path = req.address.path();
        debug!(%path, bytes = data.len(), "object stored");
        let object = StoredObject {
            data,
            etag: etag.clone(),
            content_type: req.headers.get("content-type").map(str::to_string),
            metadata,
        };
        {
            let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
            objects.insert(path, object);
        }

        let mut resp = StoreResponse::new(201);
        resp.headers.set("etag", etag);
        Ok(resp)
    }

    fn object_headers(resp: &mut StoreResponse, object: &StoredObject) {
        resp.headers.set("etag", object.etag.clone());
        resp.headers.set("content-length", object.data.len().to_string());
        if let Some(ct) = &object.content_type {
            resp.headers.set("content-type", ct.clone());
        }
        for (name, value) in &object.metadata {
            resp.headers.set(name, value.clone());
        }
    }

    fn get(&self, req: &StoreRequest, with_body: bool) -> StoreResponse {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        match objects.get(&req.address.path()) {
            Some(object) => {
                let mut resp = StoreResponse::new(200);
                Self::object_headers(&mut resp, object);
                if with_body {
                    resp.body = Some(Box::new(VecSource::new(object.data.clone(), BODY_CHUNK)));
                }
                resp
            }
            None => StoreResponse::new(404),
        }
    }

    fn delete(&self, req: &StoreRequest) -> StoreResponse {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        match objects.remove(&req.address.path()) {
            Some(_) => StoreResponse::new(204),
            None => StoreResponse::new(404),
        }
    }

    fn post(&self, req: &StoreRequest) -> StoreResponse {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        match objects.get_mut(&req.address.path()) {
            Some(object) => {
                for (name, value) in req.headers.iter() {
                    if name.starts_with(TAG_PREFIX) {
                        object.metadata.insert(name.to_string(), value.to_string());
                    }
                }
                StoreResponse::new(202)
            }
            None => StoreResponse::new(404),
        }
    }
}

#[async_trait]
impl ObjectService for MemoryStore {
    async fn handle(&self, req: StoreRequest) -> Result<StoreResponse> {
        match req.method {
            Method::Put => self.put(req).await,
            Method::Get => Ok(self.get(&req, true)),
            Method::Head => Ok(self.get(&req, false)),
            Method::Delete => Ok(self.delete(&req)),
            Method::Post => Ok(self.post(&req)),
        }
    }
}
