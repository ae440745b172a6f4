//! The middleware seam: handlers and backends share one service trait so
//! nodes stack like the original WSGI pipeline
//! (edge handler → transport → storage handler → store).

use async_trait::async_trait;

use prism_policy::{Method, MetadataProbe, ObjectAddress, ObjectMetadata, PolicyError};

use crate::error::Result;
use crate::request::{StoreRequest, StoreResponse, TAG_PREFIX};

/// An object service: terminal store, remote tier, or a handler wrapping one.
#[async_trait]
pub trait ObjectService: Send + Sync {
    /// Handle one request.
    async fn handle(&self, req: StoreRequest) -> Result<StoreResponse>;
}

#[async_trait]
impl<S: ObjectService + ?Sized> ObjectService for std::sync::Arc<S> {
    async fn handle(&self, req: StoreRequest) -> Result<StoreResponse> {
        (**self).handle(req).await
    }
}

/// Metadata probe over an [`ObjectService`]: one HEAD per probe.
///
/// Pointing the edge resolver's probe at the storage tier means probed
/// metadata reflects restored (pre-transformation) size and type.
pub struct ServiceProbe<S: ObjectService> {
    service: S,
}

impl<S: ObjectService> ServiceProbe<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: ObjectService> MetadataProbe for ServiceProbe<S> {
    async fn probe(&self, addr: &ObjectAddress) -> std::result::Result<ObjectMetadata, PolicyError> {
        let req = StoreRequest::new(Method::Head, addr.clone());
        let resp = self
            .service
            .handle(req)
            .await
            .map_err(|e| PolicyError::Probe(e.to_string()))?;
        if !resp.is_success() {
            return Err(PolicyError::Probe(format!(
                "metadata probe for {addr} returned status {}",
                resp.status
            )));
        }

        let mut meta = ObjectMetadata {
            content_type: resp.headers.get("content-type").map(str::to_string),
            content_length: resp.headers.content_length(),
            etag: resp.headers.get("etag").map(str::to_string),
            ..Default::default()
        };
        for (name, value) in resp.headers.iter() {
            if let Some(key) = name.strip_prefix(TAG_PREFIX) {
                meta.tags.insert(key.to_string(), value.to_string());
            }
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Headers;

    struct FixedService {
        status: u16,
        headers: Headers,
    }

    #[async_trait]
    impl ObjectService for FixedService {
        async fn handle(&self, _req: StoreRequest) -> Result<StoreResponse> {
            let mut resp = StoreResponse::new(self.status);
            resp.headers = self.headers.clone();
            Ok(resp)
        }
    }

    #[tokio::test]
    async fn probe_maps_headers_to_metadata() {
        let probe = ServiceProbe::new(FixedService {
            status: 200,
            headers: Headers::from([
                ("Content-Type", "image/png"),
                ("Content-Length", "2048"),
                ("ETag", "abc"),
                ("X-Object-Meta-Tier", "cold"),
            ]),
        });
        let meta = probe.probe(&ObjectAddress::new("a", "c", "o")).await.unwrap();
        assert_eq!(meta.content_type.as_deref(), Some("image/png"));
        assert_eq!(meta.content_length, Some(2048));
        assert_eq!(meta.etag.as_deref(), Some("abc"));
        assert_eq!(meta.tags.get("tier").map(String::as_str), Some("cold"));
    }

    #[tokio::test]
    async fn probe_failure_is_a_policy_error() {
        let probe = ServiceProbe::new(FixedService {
            status: 404,
            headers: Headers::new(),
        });
        assert!(probe.probe(&ObjectAddress::new("a", "c", "o")).await.is_err());
    }
}
