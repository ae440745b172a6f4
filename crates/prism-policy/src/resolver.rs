//! Per-request policy resolution.
//!
//! `resolve` loads the global bucket plus the most specific scoped tier for
//! the target object (object → container → account, first tier with any
//! bindings wins — never a union of scoped tiers), gates each rule on its
//! per-method phase flags, evaluates conditions, and applies an explicit
//! single-filter directive when the request carries one. The result is a
//! deterministic candidate list: global rules first, then scoped, each in
//! rule-id order. Repeating resolution against an unmodified store yields an
//! identical list.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::condition::{matches, ObjectDescriptor};
use crate::error::PolicyError;
use crate::metrics::PolicyMetrics;
use crate::probe::{MetadataProbe, NoProbe};
use crate::rule::{FilterKind, FilterRule, Method, Phase, RuleScope};
use crate::store::{ObjectAddress, RuleStore};

/// Explicit "run named filter" directive carried by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDirective {
    /// Name of the single filter to run.
    pub name: String,
    /// Request-supplied parameters overriding the rule's stored params.
    pub params: BTreeMap<String, String>,
}

/// Request-scoped inputs to resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// Object metadata available from the request itself.
    pub descriptor: ObjectDescriptor,
    /// Explicit single-filter directive, if the request carries one.
    pub directive: Option<FilterDirective>,
}

/// A rule that applies to the request, with its resolved phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The matched rule (params may be directive-overridden).
    pub rule: FilterRule,
    /// Phase the rule fires in for this request's method.
    pub phase: Phase,
}

/// Stateless policy resolver. Constructed once, shared across requests.
pub struct PolicyResolver {
    store: Arc<dyn RuleStore>,
    probe: Arc<dyn MetadataProbe>,
    metrics: Arc<PolicyMetrics>,
}

impl PolicyResolver {
    /// Resolver over `store` with no metadata side channel.
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            probe: Arc::new(NoProbe),
            metrics: Arc::new(PolicyMetrics::new()),
        }
    }

    /// Attach a metadata probe for conditions the request cannot satisfy.
    pub fn with_probe(mut self, probe: Arc<dyn MetadataProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Resolution counters.
    pub fn metrics(&self) -> &Arc<PolicyMetrics> {
        &self.metrics
    }

    /// Resolve the candidate list for one request.
    #[instrument(skip(self, ctx), fields(addr = %addr, method = %method))]
    pub async fn resolve(
        &self,
        addr: &ObjectAddress,
        method: Method,
        ctx: &ResolveContext,
    ) -> Result<Vec<Candidate>, PolicyError> {
        self.metrics.record_resolution();

        let global = self.store.global_rules().await?;
        let scoped = self.scoped_tier(addr).await?;

        let mut descriptor = ctx.descriptor.clone();
        if descriptor.path.is_empty() {
            descriptor.path = addr.path();
        }
        // At most one probe per request; a failure poisons only the rules
        // that needed metadata.
        let mut probe_state = ProbeState::Untried;

        let mut candidates = Vec::new();
        let tiers: [(RuleScope, &BTreeMap<String, Value>); 2] =
            [(RuleScope::Global, &global), (RuleScope::Pipeline, &scoped)];
        for (scope, records) in tiers {
            for (id, record) in records {
                let rule = match FilterRule::from_wire(id, scope, record) {
                    Ok(rule) => rule,
                    Err(err) => {
                        warn!(rule = %id, %err, "excluding undecodable rule");
                        self.metrics.record_malformed();
                        continue;
                    }
                };

                let Some(phase) = rule.phase_flags.phase_for(method) else {
                    continue;
                };

                match self
                    .rule_applies(&rule, addr, &mut descriptor, &mut probe_state)
                    .await
                {
                    Ok(true) => candidates.push(Candidate { rule, phase }),
                    Ok(false) => {}
                    Err(err) => {
                        warn!(rule = %id, %err, "excluding rule after evaluation error");
                        self.metrics.record_condition_error();
                    }
                }
            }
        }

        if let Some(directive) = &ctx.directive {
            apply_directive(&mut candidates, directive);
        }

        self.metrics.record_matched(candidates.len() as u64);
        debug!(candidates = candidates.len(), "policy resolved");
        Ok(candidates)
    }

    /// Longest-prefix tier selection: exactly one scoped tier is read.
    async fn scoped_tier(
        &self,
        addr: &ObjectAddress,
    ) -> Result<BTreeMap<String, Value>, PolicyError> {
        for key in addr.scope_keys() {
            if let Some(rules) = self.store.pipeline_rules(&key).await? {
                debug!(%key, rules = rules.len(), "scoped tier selected");
                return Ok(rules);
            }
        }
        Ok(BTreeMap::new())
    }

    async fn rule_applies(
        &self,
        rule: &FilterRule,
        addr: &ObjectAddress,
        descriptor: &mut ObjectDescriptor,
        probe_state: &mut ProbeState,
    ) -> Result<bool, PolicyError> {
        if rule.condition.is_empty() {
            return Ok(true);
        }

        if descriptor_lacks(&rule.condition, descriptor) {
            match probe_state {
                ProbeState::Untried => match self.probe.probe(addr).await {
                    Ok(meta) => {
                        descriptor.absorb(&meta);
                        *probe_state = ProbeState::Done;
                    }
                    Err(err) => {
                        self.metrics.record_probe_failure();
                        *probe_state = ProbeState::Failed;
                        return Err(err);
                    }
                },
                ProbeState::Failed => {
                    return Err(PolicyError::Probe(
                        "metadata probe already failed for this request".to_string(),
                    ));
                }
                ProbeState::Done => {}
            }
        }

        let type_values = match &rule.condition.type_group {
            Some(group) => self.store.type_group(group).await.map_err(|e| {
                PolicyError::Condition(format!("type group {group:?} lookup failed: {e}"))
            })?,
            None => Vec::new(),
        };

        matches(&rule.condition, descriptor, &type_values)
    }
}

enum ProbeState {
    Untried,
    Done,
    Failed,
}

/// True when a clause of `cond` needs metadata `desc` does not have yet.
fn descriptor_lacks(cond: &crate::rule::FilterCondition, desc: &ObjectDescriptor) -> bool {
    (cond.type_group.is_some() && desc.content_type.is_none())
        || (cond.size.is_some() && desc.content_length.is_none())
        || (cond.tag.is_some() && desc.tags.is_empty())
}

/// Drop sandboxed candidates not named by the directive; the named one takes
/// its parameters from the request. Native candidates are untouched. A
/// directive matching nothing leaves a (possibly empty) plan — a no-op, not
/// an error.
fn apply_directive(candidates: &mut Vec<Candidate>, directive: &FilterDirective) {
    candidates.retain(|c| c.rule.kind != FilterKind::Sandboxed || c.rule.name == directive.name);
    for candidate in candidates.iter_mut() {
        if candidate.rule.kind == FilterKind::Sandboxed && candidate.rule.name == directive.name {
            candidate.rule.params = directive.params.clone();
        }
    }
}
