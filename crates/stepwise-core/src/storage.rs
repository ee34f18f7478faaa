// Stepwise Core - Storage abstractions
//
// A storage adapter is a minimal durable key/value store. Backends live in
// the stepwise-store crate; the persister layers TTL, versioning, and
// encoding on top of this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FlowResult;

/// Key/value persistence over an arbitrary durable store
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read the raw value stored under `key`
    async fn get(&self, key: &str) -> FlowResult<Option<Vec<u8>>>;

    /// Write `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: Vec<u8>) -> FlowResult<()>;

    /// Delete `key`; deleting a missing key is not an error
    async fn remove(&self, key: &str) -> FlowResult<()>;

    /// All keys starting with `prefix`
    async fn list_keys(&self, prefix: &str) -> FlowResult<Vec<String>>;
}

/// Addresses one instance of a flow within a storage namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceScope {
    /// `None` selects the shared default instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
}

impl InstanceScope {
    /// The shared default instance
    pub fn shared() -> Self {
        Self::default()
    }

    pub fn instance(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            variant_id: None,
        }
    }

    pub fn with_variant(mut self, variant_id: impl Into<String>) -> Self {
        self.variant_id = Some(variant_id.into());
        self
    }

    pub fn with_variant_opt(mut self, variant_id: Option<String>) -> Self {
        self.variant_id = variant_id;
        self
    }
}

/// Identity recovered from a storage key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub instance_id: Option<String>,
    pub variant_id: Option<String>,
}

/// Maps `(flowId, instanceId, variantId)` to a single storage key
pub trait KeyStrategy: Send + Sync {
    /// Storage key for one instance
    fn key(&self, prefix: &str, flow_id: &str, scope: &InstanceScope) -> String;

    /// Prefix covering every instance of a flow
    fn flow_prefix(&self, prefix: &str, flow_id: &str) -> String {
        format!("{}:{}", prefix, flow_id)
    }

    /// Decode a key listed under `flow_prefix`. Returns `None` for keys that
    /// share the textual prefix but belong to another flow.
    fn parse(&self, prefix: &str, flow_id: &str, key: &str) -> Option<ParsedKey>;
}

/// Default strategy: `{prefix}:{flowId}[:{instanceId}]`.
///
/// Parsing relies on flow ids being free of `:`, which `FlowDefinition`
/// enforces; instance ids may contain anything.
///
/// The variant id does not take part in the key, so variants of one flow
/// share a namespace. Variants are expected never to run concurrently for
/// the same instance id; a record written by another variant whose step is
/// unknown to the current graph is discarded as stale on load.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowInstanceKeys;

impl KeyStrategy for FlowInstanceKeys {
    fn key(&self, prefix: &str, flow_id: &str, scope: &InstanceScope) -> String {
        match &scope.instance_id {
            Some(instance_id) => format!("{}:{}:{}", prefix, flow_id, instance_id),
            None => format!("{}:{}", prefix, flow_id),
        }
    }

    fn parse(&self, prefix: &str, flow_id: &str, key: &str) -> Option<ParsedKey> {
        let rest = key.strip_prefix(&self.flow_prefix(prefix, flow_id))?;
        if rest.is_empty() {
            return Some(ParsedKey {
                instance_id: None,
                variant_id: None,
            });
        }
        let instance_id = rest.strip_prefix(':')?;
        if instance_id.is_empty() {
            return None;
        }
        Some(ParsedKey {
            instance_id: Some(instance_id.to_string()),
            variant_id: None,
        })
    }
}

/// Variant-aware strategy: `{prefix}:{flowId}[@{variantId}][:{instanceId}]`.
///
/// Each variant gets its own record, so switching variants never adopts
/// another variant's state.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariantScopedKeys;

impl KeyStrategy for VariantScopedKeys {
    fn key(&self, prefix: &str, flow_id: &str, scope: &InstanceScope) -> String {
        let mut key = format!("{}:{}", prefix, flow_id);
        if let Some(variant_id) = &scope.variant_id {
            key.push('@');
            key.push_str(variant_id);
        }
        if let Some(instance_id) = &scope.instance_id {
            key.push(':');
            key.push_str(instance_id);
        }
        key
    }

    fn parse(&self, prefix: &str, flow_id: &str, key: &str) -> Option<ParsedKey> {
        let rest = key.strip_prefix(&self.flow_prefix(prefix, flow_id))?;

        let (variant_id, rest) = match rest.strip_prefix('@') {
            Some(tail) => match tail.split_once(':') {
                Some((variant, instance)) => (Some(variant), Some(instance)),
                None => (Some(tail), None),
            },
            None if rest.is_empty() => (None, None),
            None => (None, Some(rest.strip_prefix(':')?)),
        };

        if variant_id.map_or(false, str::is_empty) || rest.map_or(false, str::is_empty) {
            return None;
        }

        Some(ParsedKey {
            instance_id: rest.map(str::to_string),
            variant_id: variant_id.map(str::to_string),
        })
    }
}

/// Which key strategy a persister uses, as written in configuration
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum KeyStrategyKind {
    /// `{prefix}:{flowId}[:{instanceId}]`
    #[default]
    FlowInstance,
    /// `{prefix}:{flowId}[@{variantId}][:{instanceId}]`
    VariantScoped,
}

impl KeyStrategyKind {
    pub fn build(self) -> Box<dyn KeyStrategy> {
        match self {
            KeyStrategyKind::FlowInstance => Box::new(FlowInstanceKeys),
            KeyStrategyKind::VariantScoped => Box::new(VariantScopedKeys),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keys_ignore_variant() {
        let keys = FlowInstanceKeys;
        let shared = InstanceScope::shared().with_variant("b");
        assert_eq!(keys.key("app", "onboarding", &shared), "app:onboarding");

        let scoped = InstanceScope::instance("t1").with_variant("b");
        assert_eq!(keys.key("app", "onboarding", &scoped), "app:onboarding:t1");
    }

    #[test]
    fn test_default_keys_parse() {
        let keys = FlowInstanceKeys;
        assert_eq!(
            keys.parse("app", "tasks", "app:tasks"),
            Some(ParsedKey {
                instance_id: None,
                variant_id: None
            })
        );
        assert_eq!(
            keys.parse("app", "tasks", "app:tasks:t-42").unwrap().instance_id,
            Some("t-42".to_string())
        );
        // shares the textual prefix but is another flow
        assert_eq!(keys.parse("app", "tasks", "app:tasks-archive:t1"), None);
        assert_eq!(keys.parse("app", "tasks", "other:tasks:t1"), None);
    }

    #[test]
    fn test_variant_scoped_keys() {
        let keys = VariantScopedKeys;
        let scope = InstanceScope::instance("t1").with_variant("b");
        let key = keys.key("app", "onboarding", &scope);
        assert_eq!(key, "app:onboarding@b:t1");

        let parsed = keys.parse("app", "onboarding", &key).unwrap();
        assert_eq!(parsed.instance_id.as_deref(), Some("t1"));
        assert_eq!(parsed.variant_id.as_deref(), Some("b"));

        let shared = keys.key("app", "onboarding", &InstanceScope::shared().with_variant("a"));
        assert_eq!(shared, "app:onboarding@a");
        let parsed = keys.parse("app", "onboarding", &shared).unwrap();
        assert_eq!(parsed.instance_id, None);
        assert_eq!(parsed.variant_id.as_deref(), Some("a"));

        let plain = keys.parse("app", "onboarding", "app:onboarding:t2").unwrap();
        assert_eq!(plain.instance_id.as_deref(), Some("t2"));
        assert_eq!(plain.variant_id, None);

        assert_eq!(keys.parse("app", "onboarding", "app:onboardingx"), None);
    }

    #[test]
    fn test_key_strategy_kind_from_config() {
        let kind: KeyStrategyKind = serde_json::from_str("\"variantScoped\"").unwrap();
        assert_eq!(kind, KeyStrategyKind::VariantScoped);
        let scope = InstanceScope::shared().with_variant("v2");
        assert_eq!(kind.build().key("p", "f", &scope), "p:f@v2");
    }
}
