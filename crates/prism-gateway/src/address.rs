//! Request path parsing.
//!
//! The version/account/container/object split happens once at request entry
//! and returns either a structured address or a typed not-applicable
//! outcome; nothing downstream re-parses the path.

use prism_policy::ObjectAddress;

/// A parsed object request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAddress {
    /// API version segment (`v1`).
    pub api_version: String,
    /// Account/container/object triple.
    pub address: ObjectAddress,
}

/// Outcome of parsing an incoming path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPath {
    /// The request targets an object.
    Object(RequestAddress),
    /// Not an object request (account/container listing, health check, …);
    /// the middleware passes it through untouched.
    NotApplicable,
}

/// Parse an edge-node path: `/{api}/{account}/{container}/{object}`.
/// Object names may contain `/`.
pub fn parse_edge_path(path: &str) -> ParsedPath {
    let mut parts = path.trim_start_matches('/').splitn(4, '/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(api), Some(account), Some(container), Some(object))
            if !api.is_empty() && !account.is_empty() && !container.is_empty() && !object.is_empty() =>
        {
            ParsedPath::Object(RequestAddress {
                api_version: api.to_string(),
                address: ObjectAddress::new(account, container, object),
            })
        }
        _ => ParsedPath::NotApplicable,
    }
}

/// Parse a storage-node path:
/// `/{device}/{partition}/{account}/{container}/{object}`.
pub fn parse_storage_path(path: &str) -> ParsedPath {
    let mut parts = path.trim_start_matches('/').splitn(5, '/');
    match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some(device), Some(_partition), Some(account), Some(container), Some(object))
            if !device.is_empty()
                && !account.is_empty()
                && !container.is_empty()
                && !object.is_empty() =>
        {
            ParsedPath::Object(RequestAddress {
                api_version: "0".to_string(),
                address: ObjectAddress::new(account, container, object),
            })
        }
        _ => ParsedPath::NotApplicable,
    }
}
