//! Inter-node handoff codec.
//!
//! The sub-plan destined for the other node travels as one request/response
//! metadata field: a JSON map from launch key to filter descriptor. Launch
//! keys are the invocation's position in the plan (unique and ascending), so
//! equal-order global and scoped rules cannot collide; the receiving node
//! sorts by key and treats the result as a new, independent local plan.

use std::collections::BTreeMap;

use crate::error::PlanError;
use crate::plan::{ExecutionPlan, FilterInvocation};

/// Metadata field carrying the serialized remote sub-plan.
pub const HANDOFF_HEADER: &str = "x-prism-filters";

/// Serialize a sub-plan for transport. Plans are small; the encoding is a
/// compact JSON object.
pub fn encode_handoff(plan: &ExecutionPlan) -> Result<String, PlanError> {
    let keyed: BTreeMap<String, &FilterInvocation> = plan
        .iter()
        .enumerate()
        .map(|(idx, inv)| (idx.to_string(), inv))
        .collect();
    serde_json::to_string(&keyed).map_err(|e| PlanError::Handoff(e.to_string()))
}

/// Reconstruct a plan from transport metadata, ordered by launch key.
pub fn decode_handoff(raw: &str) -> Result<ExecutionPlan, PlanError> {
    let keyed: BTreeMap<String, FilterInvocation> =
        serde_json::from_str(raw).map_err(|e| PlanError::Handoff(e.to_string()))?;
    let mut entries: Vec<(u64, FilterInvocation)> = keyed
        .into_iter()
        .map(|(key, inv)| {
            key.parse::<u64>()
                .map(|k| (k, inv))
                .map_err(|_| PlanError::Handoff(format!("launch key {key:?} is not numeric")))
        })
        .collect::<Result<_, _>>()?;
    entries.sort_by_key(|(k, _)| *k);
    Ok(ExecutionPlan::new(entries.into_iter().map(|(_, inv)| inv).collect()))
}
