//! Rule store abstraction and key space.
//!
//! The policy store is a keyed lookup: hierarchical `pipeline:` keys bind
//! rule sets to an account, account/container or account/container/object,
//! a separate `global` bucket applies to every object, and `object_type:`
//! keys hold named content-type groups. Rule records are JSON objects keyed
//! by rule id; BTreeMap keeps iteration (and therefore resolution) in id
//! order.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PolicyError;

/// Prefix for scoped pipeline keys.
pub const PIPELINE_PREFIX: &str = "pipeline:";
/// Key of the global rule bucket.
pub const GLOBAL_BUCKET: &str = "global";

/// Three-level object address `(account, container, object)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectAddress {
    /// Account name.
    pub account: String,
    /// Container name.
    pub container: String,
    /// Object name (may contain `/`).
    pub object: String,
}

impl ObjectAddress {
    /// Build an address from its three components.
    pub fn new(
        account: impl Into<String>,
        container: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            object: object.into(),
        }
    }

    /// `account/container/object` path form.
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.account, self.container, self.object)
    }

    /// Scoped lookup keys, most specific first: object tier, container tier,
    /// account tier.
    pub fn scope_keys(&self) -> [String; 3] {
        [
            format!("{PIPELINE_PREFIX}{}/{}/{}", self.account, self.container, self.object),
            format!("{PIPELINE_PREFIX}{}/{}", self.account, self.container),
            format!("{PIPELINE_PREFIX}{}", self.account),
        ]
    }
}

impl std::fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Keyed lookup into the policy store.
///
/// Implementations must be safe for concurrent use by simultaneous requests;
/// the engine treats every lookup result as a read-only snapshot.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules in the global bucket, keyed by rule id.
    async fn global_rules(&self) -> Result<BTreeMap<String, Value>, PolicyError>;

    /// Rules bound to one scoped key, or `None` if the key has no bindings.
    async fn pipeline_rules(
        &self,
        key: &str,
    ) -> Result<Option<BTreeMap<String, Value>>, PolicyError>;

    /// Concrete content types of a named type group. Unknown groups resolve
    /// to an empty list.
    async fn type_group(&self, name: &str) -> Result<Vec<String>, PolicyError>;
}

#[derive(Default)]
struct Inner {
    global: BTreeMap<String, Value>,
    pipelines: BTreeMap<String, BTreeMap<String, Value>>,
    type_groups: BTreeMap<String, Vec<String>>,
}

/// In-memory rule store backed by BTreeMaps. Thread-safe via RwLock.
///
/// Used in tests and single-node deployments; production points the resolver
/// at the shared policy key-value store instead.
#[derive(Default)]
pub struct MemoryRuleStore {
    inner: RwLock<Inner>,
}

impl MemoryRuleStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a rule record into the global bucket.
    pub fn bind_global(&self, id: &str, record: Value) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.global.insert(id.to_string(), record);
    }

    /// Bind a rule record to a scoped pipeline key (see
    /// [`ObjectAddress::scope_keys`] for the key forms).
    pub fn bind_pipeline(&self, key: &str, id: &str, record: Value) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .pipelines
            .entry(key.to_string())
            .or_default()
            .insert(id.to_string(), record);
    }

    /// Replace a named content-type group.
    pub fn put_type_group(&self, name: &str, values: Vec<String>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.type_groups.insert(name.to_string(), values);
    }

    /// Remove every binding under a scoped key.
    pub fn unbind_pipeline(&self, key: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.pipelines.remove(key);
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn global_rules(&self) -> Result<BTreeMap<String, Value>, PolicyError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| PolicyError::StoreUnavailable(e.to_string()))?;
        Ok(inner.global.clone())
    }

    async fn pipeline_rules(
        &self,
        key: &str,
    ) -> Result<Option<BTreeMap<String, Value>>, PolicyError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| PolicyError::StoreUnavailable(e.to_string()))?;
        Ok(inner.pipelines.get(key).cloned())
    }

    async fn type_group(&self, name: &str) -> Result<Vec<String>, PolicyError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| PolicyError::StoreUnavailable(e.to_string()))?;
        Ok(inner.type_groups.get(name).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scope_keys_most_specific_first() {
        let addr = ObjectAddress::new("acct", "cont", "obj");
        let keys = addr.scope_keys();
        assert_eq!(keys[0], "pipeline:acct/cont/obj");
        assert_eq!(keys[1], "pipeline:acct/cont");
        assert_eq!(keys[2], "pipeline:acct");
    }

    #[tokio::test]
    async fn bind_and_lookup() {
        let store = MemoryRuleStore::new();
        store.bind_global("g1", json!({"main": "noop"}));
        store.bind_pipeline("pipeline:acct", "f1", json!({"main": "compress"}));

        let global = store.global_rules().await.unwrap();
        assert_eq!(global.len(), 1);
        assert!(store
            .pipeline_rules("pipeline:acct")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .pipeline_rules("pipeline:other")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn type_groups() {
        let store = MemoryRuleStore::new();
        store.put_type_group("document", vec!["text/plain".to_string()]);
        assert_eq!(
            store.type_group("document").await.unwrap(),
            vec!["text/plain".to_string()]
        );
        assert!(store.type_group("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unbind_removes_the_tier() {
        let store = MemoryRuleStore::new();
        store.bind_pipeline("pipeline:acct/cont", "f1", json!({"main": "x"}));
        store.unbind_pipeline("pipeline:acct/cont");
        assert!(store
            .pipeline_rules("pipeline:acct/cont")
            .await
            .unwrap()
            .is_none());
    }
}
