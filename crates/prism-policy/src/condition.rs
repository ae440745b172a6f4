//! Condition evaluation: does a rule apply to this object?
//!
//! Every specified clause must hold (logical AND across clause kinds). A
//! condition with no clauses always matches. Missing metadata is an
//! evaluation error, not a silent false — the resolver reports it and
//! excludes the rule.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::probe::ObjectMetadata;
use crate::rule::FilterCondition;

/// Object metadata available at evaluation time: from request headers on PUT,
/// or from a metadata probe on the remaining methods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Object path (`account/container/object`).
    pub path: String,
    /// Declared content type, if known.
    pub content_type: Option<String>,
    /// Declared content length in bytes, if known.
    pub content_length: Option<u64>,
    /// Object tag key/value pairs.
    pub tags: BTreeMap<String, String>,
}

impl ObjectDescriptor {
    /// Descriptor with only a path, metadata to be probed on demand.
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Fill unset fields from a probe result. Fields already present win.
    pub fn absorb(&mut self, meta: &ObjectMetadata) {
        if self.content_type.is_none() {
            self.content_type = meta.content_type.clone();
        }
        if self.content_length.is_none() {
            self.content_length = meta.content_length;
        }
        for (k, v) in &meta.tags {
            self.tags.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

/// Evaluate `condition` against `descriptor`. `type_values` is the resolved
/// content-type group for the condition's `type_group` clause (ignored when
/// the clause is absent).
pub fn matches(
    condition: &FilterCondition,
    descriptor: &ObjectDescriptor,
    type_values: &[String],
) -> Result<bool, PolicyError> {
    if let Some(group) = &condition.type_group {
        let content_type = descriptor.content_type.as_deref().ok_or_else(|| {
            PolicyError::Condition(format!(
                "type group {group:?} requires a content type, none available for {}",
                descriptor.path
            ))
        })?;
        if !type_values.iter().any(|t| t == content_type) {
            return Ok(false);
        }
    }

    if let Some(tag) = &condition.tag {
        match descriptor.tags.get(&tag.key) {
            Some(v) if *v == tag.value => {}
            _ => return Ok(false),
        }
    }

    if let Some(size) = &condition.size {
        let length = descriptor.content_length.ok_or_else(|| {
            PolicyError::Condition(format!(
                "size clause requires a content length, none available for {}",
                descriptor.path
            ))
        })?;
        if !size.op.eval(length, size.threshold) {
            return Ok(false);
        }
    }

    Ok(true)
}
