//! Execution plan model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use prism_policy::{Candidate, ExecutionNode, FilterKind, Phase};

/// One filter invocation within a plan: the rule projected onto a request,
/// with resolved parameters, phase, node and direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterInvocation {
    /// Rule id the invocation was derived from.
    pub id: String,
    /// Filter name.
    pub name: String,
    /// Native or sandboxed execution.
    pub kind: FilterKind,
    /// Implementation selector (registered constructor name or sandbox image).
    pub main: String,
    /// Sandbox dependency list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Node this invocation runs on.
    pub node: ExecutionNode,
    /// Node the inverse must run on during reads, if reversible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_node: Option<ExecutionNode>,
    /// Phase relative to the backend operation.
    pub phase: Phase,
    /// Execution rank inherited from the rule.
    pub order: i64,
    /// Resolved parameter map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// True when the filter must apply its inverse transform.
    #[serde(default)]
    pub reverse: bool,
}

impl FilterInvocation {
    /// Project a resolved candidate into an invocation.
    pub fn from_candidate(candidate: &Candidate) -> Self {
        let rule = &candidate.rule;
        Self {
            id: rule.id.clone(),
            name: rule.name.clone(),
            kind: rule.kind,
            main: rule.main.clone(),
            dependencies: rule.dependencies.clone(),
            node: rule.execution_node,
            reverse_node: rule.reverse_node,
            phase: candidate.phase,
            order: rule.order,
            params: rule.params.clone(),
            reverse: false,
        }
    }
}

/// Ordered sequence of filter invocations for one request. Items execute in
/// the order they appear; the builder guarantees ascending `order`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// The invocations, in execution order.
    pub invocations: Vec<FilterInvocation>,
}

impl ExecutionPlan {
    /// An empty plan.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Plan over the given invocations, order preserved.
    pub fn new(invocations: Vec<FilterInvocation>) -> Self {
        Self { invocations }
    }

    /// True when the plan has no invocations.
    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    /// Number of invocations.
    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    /// Iterate the invocations in execution order.
    pub fn iter(&self) -> std::slice::Iter<'_, FilterInvocation> {
        self.invocations.iter()
    }

    /// Invocations of the given phase, order preserved.
    pub fn for_phase(&self, phase: Phase) -> ExecutionPlan {
        ExecutionPlan::new(
            self.invocations
                .iter()
                .filter(|inv| inv.phase == phase)
                .cloned()
                .collect(),
        )
    }
}
