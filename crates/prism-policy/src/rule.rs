//! Filter rule model and wire decoding.
//!
//! Rule records arrive from the rule store as JSON objects keyed by rule id.
//! The wire shape is tolerant (two generations of the policy controller wrote
//! slightly different records): node names may be `edge`/`storage` or the
//! legacy `proxy`/`object`, per-method flags may be booleans or truthy
//! strings, and params may be a structured map or a comma-joined `k=v` list.
//! Decoding normalizes all of that into [`FilterRule`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PolicyError;

/// Logical tier on which a filter instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionNode {
    /// Edge/proxy node (first hop for client requests).
    #[serde(alias = "proxy")]
    Edge,
    /// Storage node (co-located with the stored object).
    #[serde(alias = "object")]
    Storage,
}

impl FromStr for ExecutionNode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "edge" | "proxy" => Ok(ExecutionNode::Edge),
            "storage" | "object" => Ok(ExecutionNode::Storage),
            other => Err(format!("unknown execution node {other:?}")),
        }
    }
}

impl fmt::Display for ExecutionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionNode::Edge => write!(f, "edge"),
            ExecutionNode::Storage => write!(f, "storage"),
        }
    }
}

/// How a filter executes: in-process or delegated to the sandboxed executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// In-process byte transform run by the pipeline engine itself.
    Native,
    /// Delegated to the external sandboxed execution capability.
    #[serde(alias = "storlet")]
    Sandboxed,
}

impl FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(FilterKind::Native),
            "sandboxed" | "storlet" => Ok(FilterKind::Sandboxed),
            other => Err(format!("unknown filter kind {other:?}")),
        }
    }
}

/// Object-store request methods the pipeline engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Object read.
    Get,
    /// Object write.
    Put,
    /// Metadata update.
    Post,
    /// Object removal.
    Delete,
    /// Metadata read.
    Head,
}

impl Method {
    /// Lowercase name used to build per-method wire flag keys (`is_pre_get`).
    pub fn wire_name(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Put => "put",
            Method::Post => "post",
            Method::Delete => "delete",
            Method::Head => "head",
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            other => Err(format!("unknown method {other:?}")),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name().to_ascii_uppercase())
    }
}

/// Execution phase relative to the backend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Before the backend call (request body on writes).
    Pre,
    /// After the backend call (response body on reads).
    Post,
}

/// Pre/post flags for a single method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodFlags {
    /// Fire before the backend call.
    pub pre: bool,
    /// Fire after the backend call.
    pub post: bool,
}

impl MethodFlags {
    /// Phase this method resolves to. Pre wins when both flags are set.
    pub fn phase(&self) -> Option<Phase> {
        if self.pre {
            Some(Phase::Pre)
        } else if self.post {
            Some(Phase::Post)
        } else {
            None
        }
    }
}

/// Per-method phase flags for one rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFlags {
    /// GET flags.
    pub get: MethodFlags,
    /// PUT flags.
    pub put: MethodFlags,
    /// POST flags.
    pub post: MethodFlags,
    /// DELETE flags.
    pub delete: MethodFlags,
    /// HEAD flags.
    pub head: MethodFlags,
}

impl PhaseFlags {
    /// Flags for one method.
    pub fn for_method(&self, method: Method) -> MethodFlags {
        match method {
            Method::Get => self.get,
            Method::Put => self.put,
            Method::Post => self.post,
            Method::Delete => self.delete,
            Method::Head => self.head,
        }
    }

    /// Phase the rule fires in for `method`, if any.
    pub fn phase_for(&self, method: Method) -> Option<Phase> {
        self.for_method(method).phase()
    }
}

/// Size comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeOp {
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `<=`
    Le,
    /// `<`
    Lt,
    /// `!=`
    Ne,
}

impl SizeOp {
    /// Apply the operator to `(lhs, rhs)`.
    pub fn eval(&self, lhs: u64, rhs: u64) -> bool {
        match self {
            SizeOp::Gt => lhs > rhs,
            SizeOp::Ge => lhs >= rhs,
            SizeOp::Eq => lhs == rhs,
            SizeOp::Le => lhs <= rhs,
            SizeOp::Lt => lhs < rhs,
            SizeOp::Ne => lhs != rhs,
        }
    }
}

impl FromStr for SizeOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(SizeOp::Gt),
            ">=" => Ok(SizeOp::Ge),
            "==" => Ok(SizeOp::Eq),
            "<=" => Ok(SizeOp::Le),
            "<" => Ok(SizeOp::Lt),
            "!=" => Ok(SizeOp::Ne),
            other => Err(format!("unknown size operator {other:?}")),
        }
    }
}

/// Parsed `(operator, threshold)` size clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeConstraint {
    /// Comparison operator.
    pub op: SizeOp,
    /// Threshold in bytes.
    pub threshold: u64,
}

/// Tag clause: the object must carry tag `key` with exactly `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMatch {
    /// Tag key.
    pub key: String,
    /// Required tag value.
    pub value: String,
}

/// Optional predicate attached to a rule. Empty condition always matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Content-type group name, resolved through the rule store.
    pub type_group: Option<String>,
    /// Required tag key/value pair.
    pub tag: Option<TagMatch>,
    /// Object size clause.
    pub size: Option<SizeConstraint>,
}

impl FilterCondition {
    /// True when no clause is specified.
    pub fn is_empty(&self) -> bool {
        self.type_group.is_none() && self.tag.is_none() && self.size.is_none()
    }

    /// True when evaluating this condition needs object metadata
    /// (content type, length or tags).
    pub fn needs_metadata(&self) -> bool {
        !self.is_empty()
    }
}

/// Which bucket a rule was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    /// Applies to every object. Resolved before scoped rules at equal order.
    Global,
    /// Bound to an account, account/container or account/container/object key.
    Pipeline,
}

/// One filter rule, decoded from the rule store. Read-only for the
/// duration of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Opaque identifier, unique within its scope.
    pub id: String,
    /// Filter name matched against an explicit single-filter directive.
    pub name: String,
    /// In-process or sandboxed execution.
    pub kind: FilterKind,
    /// Implementation selector: registered native constructor name, or
    /// sandbox image identifier.
    pub main: String,
    /// Sandbox dependency list (empty for native filters).
    pub dependencies: Vec<String>,
    /// Node that normally runs this filter.
    pub execution_node: ExecutionNode,
    /// Node that must run the inverse on read, if the filter is reversible.
    pub reverse_node: Option<ExecutionNode>,
    /// Per-method pre/post flags.
    pub phase_flags: PhaseFlags,
    /// Applicability predicate.
    pub condition: FilterCondition,
    /// Execution rank; ties broken by scope tier then rule id.
    pub order: i64,
    /// Flat parameter map handed to the filter instance.
    pub params: BTreeMap<String, String>,
    /// Bucket the rule came from.
    pub scope: RuleScope,
}

impl FilterRule {
    /// Decode one wire record. `id` is the rule-store hash key, `scope` the
    /// bucket it came from.
    pub fn from_wire(id: &str, scope: RuleScope, record: &Value) -> Result<Self, PolicyError> {
        let obj = record.as_object().ok_or_else(|| malformed(id, "record is not a JSON object"))?;

        let main = string_field(obj, &["main"])
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed(id, "missing main entry point"))?;
        let name = string_field(obj, &["name", "filter_name"]).unwrap_or_else(|| id.to_string());

        let kind = match string_field(obj, &["filter_type", "type"]) {
            Some(s) => s.parse::<FilterKind>().map_err(|e| malformed(id, &e))?,
            None => FilterKind::Native,
        };

        let execution_node = string_field(obj, &["execution_server"])
            .ok_or_else(|| malformed(id, "missing execution_server"))?
            .parse::<ExecutionNode>()
            .map_err(|e| malformed(id, &e))?;

        let has_reverse = obj.get("has_reverse").map(truthy).unwrap_or(false);
        let reverse_field = string_field(obj, &["execution_server_reverse"]).filter(|s| !s.is_empty());
        let reverse_node = match (has_reverse, reverse_field, obj.contains_key("has_reverse")) {
            (true, Some(s), _) => Some(s.parse::<ExecutionNode>().map_err(|e| malformed(id, &e))?),
            (true, None, _) => return Err(malformed(id, "has_reverse set but no execution_server_reverse")),
            // Older records omit has_reverse and signal reversibility by the
            // reverse-server field alone.
            (false, Some(s), false) => Some(s.parse::<ExecutionNode>().map_err(|e| malformed(id, &e))?),
            _ => None,
        };

        let order = match obj.get("execution_order") {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| malformed(id, "execution_order is not an integer"))?,
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| malformed(id, "execution_order is not numeric"))?,
            Some(_) => return Err(malformed(id, "execution_order has an unexpected type")),
            None => return Err(malformed(id, "missing execution_order")),
        };

        let params = match obj.get("params") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(v) => parse_params(v).map_err(|e| malformed(id, &e))?,
        };

        let dependencies = match obj.get("dependencies") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| malformed(id, "dependency entry is not a string"))
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(malformed(id, "dependencies has an unexpected type")),
        };

        let condition = parse_condition(id, obj)?;
        let phase_flags = parse_phase_flags(obj);

        Ok(FilterRule {
            id: id.to_string(),
            name,
            kind,
            main,
            dependencies,
            execution_node,
            reverse_node,
            phase_flags,
            condition,
            order,
            params,
            scope,
        })
    }
}

fn malformed(id: &str, reason: &str) -> PolicyError {
    PolicyError::MalformedRule {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, names: &[&str]) -> Option<String> {
    for name in names {
        if let Some(Value::String(s)) = obj.get(*name) {
            return Some(s.clone());
        }
    }
    None
}

/// Truthy in the object-store configuration sense: `true`, `"true"`, `"yes"`,
/// `"on"`, `"1"` (case-insensitive).
fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().map(|i| i != 0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "on" | "1" | "t" | "y"
        ),
        _ => false,
    }
}

fn parse_params(v: &Value) -> Result<BTreeMap<String, String>, String> {
    match v {
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, val) in map {
                let s = match val {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return Err(format!("param {k:?} has an unexpected type")),
                };
                out.insert(k.clone(), s);
            }
            Ok(out)
        }
        // Legacy comma-joined list: "k1=v1,k2=v2"
        Value::String(s) => {
            let mut out = BTreeMap::new();
            for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (k, v) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("param entry {pair:?} is not k=v"))?;
                out.insert(k.trim().to_string(), v.trim().to_string());
            }
            Ok(out)
        }
        _ => Err("params must be a map or a comma-joined string".to_string()),
    }
}

fn parse_condition(
    id: &str,
    obj: &serde_json::Map<String, Value>,
) -> Result<FilterCondition, PolicyError> {
    let type_group = string_field(obj, &["object_type"]).filter(|s| !s.is_empty());

    let tag = match string_field(obj, &["object_tag"]).filter(|s| !s.is_empty()) {
        Some(s) => {
            let (k, v) = s
                .split_once(':')
                .ok_or_else(|| malformed(id, "object_tag is not key:value"))?;
            Some(TagMatch {
                key: k.trim().to_string(),
                value: v.trim().to_string(),
            })
        }
        None => None,
    };

    let size_value = obj
        .get("object_size")
        .or_else(|| obj.get("content_length"))
        .filter(|v| !v.is_null() && *v != &Value::String(String::new()));
    let size = match size_value {
        Some(Value::Array(pair)) => {
            if pair.len() != 2 {
                return Err(malformed(id, "size condition is not a two-element pair"));
            }
            let op = pair[0]
                .as_str()
                .ok_or_else(|| malformed(id, "size operator is not a string"))?
                .parse::<SizeOp>()
                .map_err(|e| malformed(id, &e))?;
            let threshold = match &pair[1] {
                Value::Number(n) => n
                    .as_u64()
                    .ok_or_else(|| malformed(id, "size threshold is not a non-negative integer"))?,
                Value::String(s) => s
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| malformed(id, "size threshold is not numeric"))?,
                _ => return Err(malformed(id, "size threshold has an unexpected type")),
            };
            Some(SizeConstraint { op, threshold })
        }
        Some(_) => return Err(malformed(id, "size condition has an unexpected type")),
        None => None,
    };

    Ok(FilterCondition {
        type_group,
        tag,
        size,
    })
}

fn parse_phase_flags(obj: &serde_json::Map<String, Value>) -> PhaseFlags {
    let flag = |name: &str| obj.get(name).map(truthy).unwrap_or(false);
    let method = |m: &str| MethodFlags {
        pre: flag(&format!("is_pre_{m}")),
        post: flag(&format!("is_post_{m}")),
    };
    PhaseFlags {
        get: method("get"),
        put: method("put"),
        post: method("post"),
        delete: method("delete"),
        head: method("head"),
    }
}
