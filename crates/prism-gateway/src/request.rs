//! Request/response carriers and header conventions.
//!
//! These are deliberately minimal: the gateway does not model HTTP, only the
//! pieces the pipeline engine touches — a method, an address, a
//! case-insensitive header map and an optional pull-based body.

use std::collections::BTreeMap;

use prism_policy::{FilterDirective, Method, ObjectAddress, ObjectDescriptor};
use prism_stream::ByteSource;

use crate::error::{GatewayError, Result};

/// Header naming one filter to run directly.
pub const RUN_FILTER_HEADER: &str = "x-prism-run-filter";
/// Prefix for directive parameter headers; each value is a URL-encoded
/// `key:value` pair.
pub const PARAMETER_PREFIX: &str = "x-prism-parameter-";
/// Prefix for user tag headers (`x-object-meta-<key>: <value>`).
pub const TAG_PREFIX: &str = "x-object-meta-";

/// Case-insensitive header map; keys are normalized to lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Declared content length, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length").and_then(|s| s.trim().parse().ok())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Headers {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let mut headers = Headers::new();
        for (k, v) in pairs {
            headers.set(k, v);
        }
        headers
    }
}

/// A request travelling down the middleware stack.
pub struct StoreRequest {
    pub method: Method,
    pub address: ObjectAddress,
    pub headers: Headers,
    pub body: Option<Box<dyn ByteSource>>,
}

impl StoreRequest {
    pub fn new(method: Method, address: ObjectAddress) -> Self {
        Self {
            method,
            address,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Box<dyn ByteSource>) -> Self {
        self.body = Some(body);
        self
    }
}

impl std::fmt::Debug for StoreRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRequest")
            .field("method", &self.method)
            .field("address", &self.address)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// A response travelling back up the middleware stack.
pub struct StoreResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Option<Box<dyn ByteSource>>,
}

impl StoreResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Box<dyn ByteSource>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for StoreResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreResponse")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Pop the single-filter directive and its parameter headers, if present.
///
/// Parameters follow the reserved-prefix convention: each
/// `x-prism-parameter-<n>` header holds one URL-encoded `key:value` pair.
pub fn take_directive(headers: &mut Headers) -> Result<Option<FilterDirective>> {
    let Some(name) = headers.remove(RUN_FILTER_HEADER) else {
        return Ok(None);
    };
    if name.trim().is_empty() {
        return Err(GatewayError::BadDirective("empty filter name".to_string()));
    }

    let param_headers: Vec<String> = headers
        .iter()
        .filter(|(k, _)| k.starts_with(PARAMETER_PREFIX))
        .map(|(k, _)| k.to_string())
        .collect();

    let mut params = BTreeMap::new();
    for header in param_headers {
        let raw = headers.remove(&header).unwrap_or_default();
        let decoded = urlencoding::decode(&raw)
            .map_err(|e| GatewayError::BadDirective(format!("{header}: {e}")))?;
        let (key, value) = decoded
            .split_once(':')
            .ok_or_else(|| GatewayError::BadDirective(format!("{header}: not key:value")))?;
        params.insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok(Some(FilterDirective {
        name: name.trim().to_string(),
        params,
    }))
}

/// Build the condition-evaluation descriptor from what the request carries.
pub fn descriptor_from_headers(address: &ObjectAddress, headers: &Headers) -> ObjectDescriptor {
    let mut descriptor = ObjectDescriptor::for_path(address.path());
    descriptor.content_type = headers.get("content-type").map(str::to_string);
    descriptor.content_length = headers.content_length();
    for (name, value) in headers.iter() {
        if let Some(key) = name.strip_prefix(TAG_PREFIX) {
            descriptor.tags.insert(key.to_string(), value.to_string());
        }
    }
    descriptor
}
