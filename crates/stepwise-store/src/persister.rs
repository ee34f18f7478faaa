//! TTL-aware persister for flow instance state
//!
//! Wraps a [`StorageAdapter`] and owns everything the adapter should not
//! know about: key layout, JSON encoding, record versioning, and expiry.
//! Expiry is lazy - an expired record is simply reported as absent on load;
//! nothing sweeps storage in the background.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use stepwise_core::{
    FlowInstanceState, FlowResult, InstanceScope, KeyStrategy, KeyStrategyKind,
    PersistedFlowState, StorageAdapter, DEFAULT_PREFIX, RECORD_VERSION,
};
use tracing::{debug, warn};

/// Upgrades a record written under an older schema version. Returning
/// `None` discards the record.
pub type MigrateFn =
    Arc<dyn Fn(PersistedFlowState, u32) -> Option<PersistedFlowState> + Send + Sync>;

/// Persister configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersisterConfig {
    /// Namespace prefix for every storage key
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Record lifetime in seconds; absent means records never expire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,

    /// Schema version stamped on written records
    #[serde(default = "default_version")]
    pub version: u32,

    /// Storage key layout
    #[serde(default)]
    pub key_strategy: KeyStrategyKind,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_version() -> u32 {
    RECORD_VERSION
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            ttl_secs: None,
            version: default_version(),
            key_strategy: KeyStrategyKind::default(),
        }
    }
}

/// One persisted instance of a flow, as returned by [`Persister::list`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredInstance {
    /// `None` for the shared default instance
    pub instance_id: Option<String>,
    /// Only recovered by variant-aware key strategies
    pub variant_id: Option<String>,
    pub state: PersistedFlowState,
}

/// Loads, saves, lists and removes flow records
#[derive(Clone)]
pub struct Persister {
    adapter: Arc<dyn StorageAdapter>,
    prefix: String,
    ttl: Option<Duration>,
    version: u32,
    keys: Arc<dyn KeyStrategy>,
    migrate: Option<MigrateFn>,
}

impl Persister {
    /// Persister with default configuration: `stepwise` prefix, no TTL
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self::from_config(adapter, &PersisterConfig::default())
    }

    pub fn from_config(adapter: Arc<dyn StorageAdapter>, config: &PersisterConfig) -> Self {
        Self {
            adapter,
            prefix: config.prefix.clone(),
            ttl: config.ttl_secs.map(Duration::from_secs),
            version: config.version,
            keys: Arc::from(config.key_strategy.build()),
            migrate: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_key_strategy(mut self, keys: impl KeyStrategy + 'static) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    pub fn with_migration<F>(mut self, migrate: F) -> Self
    where
        F: Fn(PersistedFlowState, u32) -> Option<PersistedFlowState> + Send + Sync + 'static,
    {
        self.migrate = Some(Arc::new(migrate));
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Storage key for one instance
    pub fn key_for(&self, flow_id: &str, scope: &InstanceScope) -> String {
        self.keys.key(&self.prefix, flow_id, scope)
    }

    /// Load a record. Returns `None` when absent, expired, or written under
    /// an incompatible version that no migration accepts.
    pub async fn load(
        &self,
        flow_id: &str,
        scope: &InstanceScope,
    ) -> FlowResult<Option<PersistedFlowState>> {
        let key = self.key_for(flow_id, scope);
        let Some(bytes) = self.adapter.get(&key).await? else {
            return Ok(None);
        };

        let record: PersistedFlowState = serde_json::from_slice(&bytes)?;
        Ok(self.accept(&key, record))
    }

    /// Expiry and version gate shared by `load` and `list`
    fn accept(&self, key: &str, record: PersistedFlowState) -> Option<PersistedFlowState> {
        if self.is_expired(&record) {
            debug!(key, saved_at = %record.saved_at, "Ignoring expired flow record");
            return None;
        }

        if record.version == self.version {
            return Some(record);
        }

        let from = record.version;
        match &self.migrate {
            Some(migrate) => match migrate(record, from) {
                Some(mut migrated) => {
                    debug!(key, from, to = self.version, "Migrated flow record");
                    migrated.version = self.version;
                    Some(migrated)
                }
                None => {
                    debug!(key, from, "Migration rejected flow record");
                    None
                }
            },
            None => {
                debug!(key, from, expected = self.version, "Ignoring flow record with incompatible version");
                None
            }
        }
    }

    fn is_expired(&self, record: &PersistedFlowState) -> bool {
        let ttl = self
            .ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok());
        record.is_expired_at(ttl, Utc::now())
    }

    /// Serialize and write a record, stamping `savedAt` and `version`
    pub async fn save(
        &self,
        flow_id: &str,
        scope: &InstanceScope,
        mut record: PersistedFlowState,
    ) -> FlowResult<()> {
        record.saved_at = Utc::now();
        record.version = self.version;

        let key = self.key_for(flow_id, scope);
        let bytes = serde_json::to_vec(&record)?;
        self.adapter.set(&key, bytes).await?;
        debug!(key, step = %record.step_id, "Saved flow record");
        Ok(())
    }

    /// Save the durable projection of an instance's state
    pub async fn save_state(&self, state: &FlowInstanceState) -> FlowResult<()> {
        let scope = InstanceScope {
            instance_id: state.instance_id.clone(),
            variant_id: state.variant_id.clone(),
        };
        self.save(&state.flow_id, &scope, state.to_persisted()).await
    }

    pub async fn remove(&self, flow_id: &str, scope: &InstanceScope) -> FlowResult<()> {
        let key = self.key_for(flow_id, scope);
        self.adapter.remove(&key).await?;
        debug!(key, "Removed flow record");
        Ok(())
    }

    /// Whether a live (non-expired, compatible) record exists
    pub async fn exists(&self, flow_id: &str, scope: &InstanceScope) -> FlowResult<bool> {
        Ok(self.load(flow_id, scope).await?.is_some())
    }

    /// Remove every record under this persister's prefix. Returns how many
    /// keys were removed.
    pub async fn remove_all(&self) -> FlowResult<usize> {
        let keys = self.adapter.list_keys(&self.namespace()).await?;
        for key in &keys {
            self.adapter.remove(key).await?;
        }
        debug!(prefix = %self.prefix, removed = keys.len(), "Removed all flow records");
        Ok(keys.len())
    }

    /// Every live instance of a flow, most recently saved first.
    ///
    /// Records that fail to decode are logged and skipped so that one
    /// corrupt draft does not hide the others.
    pub async fn list(&self, flow_id: &str) -> FlowResult<Vec<StoredInstance>> {
        let flow_prefix = self.keys.flow_prefix(&self.prefix, flow_id);
        let mut instances = Vec::new();

        for key in self.adapter.list_keys(&flow_prefix).await? {
            let Some(parsed) = self.keys.parse(&self.prefix, flow_id, &key) else {
                continue;
            };
            let Some(bytes) = self.adapter.get(&key).await? else {
                continue;
            };
            let record: PersistedFlowState = match serde_json::from_slice(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable flow record");
                    continue;
                }
            };
            if let Some(state) = self.accept(&key, record) {
                instances.push(StoredInstance {
                    instance_id: parsed.instance_id,
                    variant_id: parsed.variant_id,
                    state,
                });
            }
        }

        instances.sort_by(|a, b| b.state.saved_at.cmp(&a.state.saved_at));
        Ok(instances)
    }

    /// Physically delete expired records under this prefix. Returns how
    /// many were removed. Expiry is otherwise only applied on read.
    pub async fn purge_expired(&self) -> FlowResult<usize> {
        let mut removed = 0;
        for key in self.adapter.list_keys(&self.namespace()).await? {
            let Some(bytes) = self.adapter.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<PersistedFlowState>(&bytes) {
                Ok(record) if self.is_expired(&record) => {
                    self.adapter.remove(&key).await?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable flow record"),
            }
        }
        debug!(prefix = %self.prefix, removed, "Purged expired flow records");
        Ok(removed)
    }

    fn namespace(&self) -> String {
        format!("{}:", self.prefix)
    }
}

impl std::fmt::Debug for Persister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persister")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .field("version", &self.version)
            .field("migrate", &self.migrate.is_some())
            .finish()
    }
}
