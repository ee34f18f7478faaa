pub mod completion;
pub mod list;
pub mod navigate;
pub mod reset;
pub mod show;
pub mod start;
pub mod validate;

use anyhow::{bail, Context as _, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use stepwise_core::{Context, FlowDefinition, FlowSpec};
use stepwise_runtime::{FlowInstance, FlowOptions, SaveMode};
use stepwise_store::{FileStorage, Persister, PersisterConfig};

use crate::cli::StoreArgs;

/// Load and validate a flow definition file
pub fn load_flow(file: &Path) -> Result<FlowDefinition> {
    let spec = FlowSpec::from_file(file)
        .with_context(|| format!("Failed to load flow definition: {}", file.display()))?;
    let definition = spec
        .build()
        .with_context(|| format!("Invalid flow definition: {}", file.display()))?;
    Ok(definition)
}

/// Persister over the configured file store
pub async fn open_persister(store: &StoreArgs) -> Result<Persister> {
    let storage = FileStorage::new(&store.store)
        .await
        .with_context(|| format!("Failed to open store: {}", store.store.display()))?;
    let config = PersisterConfig {
        prefix: store.prefix.clone(),
        ttl_secs: store.ttl_secs,
        ..PersisterConfig::default()
    };
    Ok(Persister::from_config(Arc::new(storage), &config))
}

/// An instance that writes every change through, with persistence
/// failures collected so the command can fail on them
pub struct Session {
    pub instance: FlowInstance,
    failures: Arc<Mutex<Vec<String>>>,
}

impl Session {
    pub async fn open(
        store: &StoreArgs,
        definition: FlowDefinition,
        instance_id: Option<&str>,
    ) -> Result<Self> {
        let persister = open_persister(store).await?;
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();

        let mut options = FlowOptions::new()
            .persister(persister)
            .save_mode(SaveMode::Always)
            .on_persistence_error(move |err| sink.lock().push(err.to_string()));
        if let Some(id) = instance_id {
            options = options.instance_id(id);
        }

        let instance = FlowInstance::open(definition, options).await;
        Ok(Self { instance, failures })
    }

    /// Fail if any write since `open` did not reach the store
    pub fn finish(self) -> Result<FlowInstance> {
        let failures = std::mem::take(&mut *self.failures.lock());
        if let Some(first) = failures.first() {
            bail!("Failed to save flow state: {}", first);
        }
        Ok(self.instance)
    }
}

/// Parse `key=value` assignments into a context patch. Values are JSON when
/// they parse as JSON, plain strings otherwise.
pub fn parse_assignments(assignments: &[String]) -> Result<Context> {
    let mut patch = Context::new();
    for assignment in assignments {
        let Some((key, raw)) = assignment.split_once('=') else {
            bail!("Invalid assignment '{}': expected KEY=VALUE", assignment);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid assignment '{}': key is empty", assignment);
        }
        let value = serde_json::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        patch.insert(key.to_string(), value);
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_assignments() {
        let patch = parse_assignments(&args(&[
            "name=Ada",
            "age=36",
            "admin=true",
            "tags=[\"a\",\"b\"]",
            "quoted=\"42\"",
            "expr=a=b",
        ]))
        .unwrap();

        assert_eq!(patch.get("name"), Some(&json!("Ada")));
        assert_eq!(patch.get("age"), Some(&json!(36)));
        assert_eq!(patch.get("admin"), Some(&json!(true)));
        assert_eq!(patch.get("tags"), Some(&json!(["a", "b"])));
        assert_eq!(patch.get("quoted"), Some(&json!("42")));
        assert_eq!(patch.get("expr"), Some(&json!("a=b")));
    }

    #[test]
    fn test_parse_assignments_rejects_malformed() {
        assert!(parse_assignments(&args(&["novalue"])).is_err());
        assert!(parse_assignments(&args(&["=1"])).is_err());
        assert!(parse_assignments(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_load_flow_reports_invalid_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.yaml");
        std::fs::write(
            &path,
            "id: broken\nstart: a\nsteps:\n  a:\n    next: missing\n",
        )
        .unwrap();

        let err = load_flow(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("missing"));
    }
}
