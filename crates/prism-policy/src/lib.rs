#![warn(missing_docs)]

//! Prism policy subsystem: filter rules, condition evaluation, policy resolution
//!
//! Resolution path: request address → longest-prefix scope lookup (object →
//! container → account) merged with global rules → per-method phase gating →
//! condition evaluation → ordered candidate list for the plan builder.

pub mod condition;
pub mod error;
pub mod metrics;
pub mod probe;
pub mod resolver;
pub mod rule;
pub mod store;

pub use condition::ObjectDescriptor;
pub use error::PolicyError;
pub use metrics::{PolicyMetrics, PolicyMetricsSnapshot};
pub use probe::{MetadataProbe, NoProbe, ObjectMetadata};
pub use resolver::{Candidate, FilterDirective, PolicyResolver, ResolveContext};
pub use rule::{
    ExecutionNode, FilterCondition, FilterKind, FilterRule, Method, MethodFlags, Phase,
    PhaseFlags, RuleScope, SizeConstraint, SizeOp, TagMatch,
};
pub use store::{MemoryRuleStore, ObjectAddress, RuleStore};
