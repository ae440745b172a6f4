//! Plan building: ordering, tie-breaks, node partitioning, reversal
//! derivation, read-side merging.

use std::collections::BTreeMap;

use tracing::debug;

use prism_policy::{Candidate, ExecutionNode, Phase, RuleScope};

use crate::error::PlanError;
use crate::plan::{ExecutionPlan, FilterInvocation};

/// The result of building a plan: the full merged sequence plus its
/// partition into this node's work and the other node's work.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPlan {
    /// Every applicable invocation, sorted, before partition.
    pub full: ExecutionPlan,
    /// Invocations whose node matches the local node.
    pub local: ExecutionPlan,
    /// Invocations destined for the other node, to be handed off.
    pub remote: ExecutionPlan,
}

/// Sort candidates by `(order, scope tier, rule id)` — global before scoped
/// at equal order — and partition by execution node. Duplicate orders within
/// one scope tier are a fatal inconsistency.
pub fn build(candidates: &[Candidate], local_node: ExecutionNode) -> Result<BuiltPlan, PlanError> {
    check_duplicate_orders(candidates)?;

    let mut sorted: Vec<&Candidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        (a.rule.order, a.rule.scope, a.rule.id.as_str())
            .cmp(&(b.rule.order, b.rule.scope, b.rule.id.as_str()))
    });

    let full = ExecutionPlan::new(sorted.iter().map(|c| FilterInvocation::from_candidate(c)).collect());
    let (local, remote): (Vec<_>, Vec<_>) = full
        .invocations
        .iter()
        .cloned()
        .partition(|inv| inv.node == local_node);

    debug!(
        total = full.len(),
        local = local.len(),
        remote = remote.len(),
        node = %local_node,
        "execution plan built"
    );

    Ok(BuiltPlan {
        full,
        local: ExecutionPlan::new(local),
        remote: ExecutionPlan::new(remote),
    })
}

fn check_duplicate_orders(candidates: &[Candidate]) -> Result<(), PlanError> {
    let mut seen: BTreeMap<(RuleScope, i64), &str> = BTreeMap::new();
    for candidate in candidates {
        let key = (candidate.rule.scope, candidate.rule.order);
        if let Some(first) = seen.insert(key, &candidate.rule.id) {
            return Err(PlanError::DuplicateOrder {
                order: candidate.rule.order,
                first: first.to_string(),
                second: candidate.rule.id.clone(),
            });
        }
    }
    Ok(())
}

/// Derive the persisted reversal list from the full merged plan: every
/// invocation whose rule declares a reverse node, rewritten to run there,
/// after the backend read, in inverse direction. Irreversible filters are
/// dropped.
pub fn reversal_filters(full: &ExecutionPlan) -> Vec<FilterInvocation> {
    full.iter()
        .filter_map(|inv| {
            inv.reverse_node.map(|node| FilterInvocation {
                node,
                phase: Phase::Post,
                reverse: true,
                reverse_node: None,
                ..inv.clone()
            })
        })
        .collect()
}

/// Build the read-side plan for an object that was transformed at write time:
/// the persisted reversal filters first, then any live filters handed off or
/// resolved for this read. Undo is last-in-first-out, so each group runs in
/// reverse of its recorded order; the merged sequence is renumbered to fresh
/// ascending orders.
pub fn merge_read_plan(reversal: &[FilterInvocation], live: &ExecutionPlan) -> ExecutionPlan {
    let mut merged: Vec<FilterInvocation> = Vec::with_capacity(reversal.len() + live.len());
    merged.extend(reversal.iter().rev().cloned());
    merged.extend(live.iter().rev().cloned());
    for (idx, inv) in merged.iter_mut().enumerate() {
        inv.order = idx as i64;
    }
    ExecutionPlan::new(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_policy::{
        FilterCondition, FilterKind, FilterRule, Method, PhaseFlags, RuleScope,
    };
    use std::collections::BTreeMap;

    fn rule(id: &str, scope: RuleScope, order: i64, node: ExecutionNode) -> FilterRule {
        FilterRule {
            id: id.to_string(),
            name: id.to_string(),
            kind: FilterKind::Native,
            main: id.to_string(),
            dependencies: Vec::new(),
            execution_node: node,
            reverse_node: None,
            phase_flags: PhaseFlags::default(),
            condition: FilterCondition::default(),
            order,
            params: BTreeMap::new(),
            scope,
        }
    }

    fn candidate(rule: FilterRule, phase: Phase) -> Candidate {
        Candidate { rule, phase }
    }

    #[test]
    fn sorts_by_order_then_tier_then_id() {
        let candidates = vec![
            candidate(rule("z", RuleScope::Pipeline, 1, ExecutionNode::Edge), Phase::Pre),
            candidate(rule("a", RuleScope::Pipeline, 1, ExecutionNode::Edge), Phase::Pre),
            candidate(rule("g", RuleScope::Global, 1, ExecutionNode::Edge), Phase::Pre),
            candidate(rule("b", RuleScope::Pipeline, 0, ExecutionNode::Edge), Phase::Pre),
        ];
        let built = build(&candidates, ExecutionNode::Edge).unwrap();
        let ids: Vec<&str> = built.full.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "g", "a", "z"]);
    }

    #[test]
    fn ascending_order_holds_in_every_plan() {
        let candidates = vec![
            candidate(rule("c", RuleScope::Pipeline, 5, ExecutionNode::Storage), Phase::Pre),
            candidate(rule("a", RuleScope::Pipeline, 1, ExecutionNode::Edge), Phase::Pre),
            candidate(rule("b", RuleScope::Pipeline, 3, ExecutionNode::Edge), Phase::Pre),
        ];
        let built = build(&candidates, ExecutionNode::Edge).unwrap();
        for plan in [&built.full, &built.local, &built.remote] {
            let orders: Vec<i64> = plan.iter().map(|i| i.order).collect();
            let mut sorted = orders.clone();
            sorted.sort();
            assert_eq!(orders, sorted);
        }
    }

    #[test]
    fn partitions_by_node() {
        let candidates = vec![
            candidate(rule("edge1", RuleScope::Pipeline, 0, ExecutionNode::Edge), Phase::Pre),
            candidate(rule("stor1", RuleScope::Pipeline, 1, ExecutionNode::Storage), Phase::Pre),
        ];
        let built = build(&candidates, ExecutionNode::Edge).unwrap();
        assert_eq!(built.local.len(), 1);
        assert_eq!(built.local.invocations[0].id, "edge1");
        assert_eq!(built.remote.len(), 1);
        assert_eq!(built.remote.invocations[0].id, "stor1");

        let built = build(&candidates, ExecutionNode::Storage).unwrap();
        assert_eq!(built.local.invocations[0].id, "stor1");
    }

    #[test]
    fn duplicate_order_in_one_tier_is_fatal() {
        let candidates = vec![
            candidate(rule("a", RuleScope::Pipeline, 2, ExecutionNode::Edge), Phase::Pre),
            candidate(rule("b", RuleScope::Pipeline, 2, ExecutionNode::Edge), Phase::Pre),
        ];
        assert!(matches!(
            build(&candidates, ExecutionNode::Edge),
            Err(PlanError::DuplicateOrder { order: 2, .. })
        ));
    }

    #[test]
    fn equal_order_across_tiers_is_fine_global_first() {
        let candidates = vec![
            candidate(rule("scoped", RuleScope::Pipeline, 0, ExecutionNode::Edge), Phase::Pre),
            candidate(rule("global", RuleScope::Global, 0, ExecutionNode::Edge), Phase::Pre),
        ];
        let built = build(&candidates, ExecutionNode::Edge).unwrap();
        let ids: Vec<&str> = built.full.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["global", "scoped"]);
    }

    #[test]
    fn reversal_keeps_only_reversible_filters() {
        let mut reversible = rule("crypt", RuleScope::Pipeline, 1, ExecutionNode::Storage);
        reversible.reverse_node = Some(ExecutionNode::Edge);
        let plain = rule("grep", RuleScope::Pipeline, 0, ExecutionNode::Edge);

        let built = build(
            &[candidate(plain, Phase::Pre), candidate(reversible, Phase::Pre)],
            ExecutionNode::Edge,
        )
        .unwrap();
        let reversal = reversal_filters(&built.full);
        assert_eq!(reversal.len(), 1);
        let inv = &reversal[0];
        assert_eq!(inv.id, "crypt");
        assert_eq!(inv.node, ExecutionNode::Edge);
        assert_eq!(inv.phase, Phase::Post);
        assert!(inv.reverse);
        assert!(inv.reverse_node.is_none());
    }

    #[test]
    fn merge_read_plan_is_lifo_and_renumbered() {
        let mut c1 = rule("first", RuleScope::Pipeline, 0, ExecutionNode::Edge);
        c1.reverse_node = Some(ExecutionNode::Edge);
        let mut c2 = rule("second", RuleScope::Pipeline, 1, ExecutionNode::Edge);
        c2.reverse_node = Some(ExecutionNode::Edge);
        let built = build(
            &[candidate(c1, Phase::Pre), candidate(c2, Phase::Pre)],
            ExecutionNode::Edge,
        )
        .unwrap();
        let reversal = reversal_filters(&built.full);

        let live = ExecutionPlan::new(vec![FilterInvocation {
            order: 9,
            ..reversal[0].clone()
        }]);
        let merged = merge_read_plan(&reversal, &live);
        // Write-time order was first,second — undo runs second,first.
        assert_eq!(merged.invocations[0].id, "second");
        assert_eq!(merged.invocations[1].id, "first");
        let orders: Vec<i64> = merged.iter().map(|i| i.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn method_phase_projection_survives_into_invocations() {
        let mut r = rule("f", RuleScope::Pipeline, 0, ExecutionNode::Edge);
        r.phase_flags.put.pre = true;
        let phase = r.phase_flags.phase_for(Method::Put).unwrap();
        let built = build(&[candidate(r, phase)], ExecutionNode::Edge).unwrap();
        assert_eq!(built.full.invocations[0].phase, Phase::Pre);
    }
}
