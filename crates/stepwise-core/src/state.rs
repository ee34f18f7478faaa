// Stepwise Core - Flow instance state
//
// Runtime state of one flow instance and its durable projection. The
// runtime crate owns mutation; these types only know how to be created,
// merged, and converted to and from persisted records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::definition::FlowDefinition;
use crate::error::{FlowError, FlowResult};

/// Step identifier
pub type StepId = String;

/// Accumulated user data carried across steps
pub type Context = serde_json::Map<String, Value>;

/// Current persisted record schema version
pub const RECORD_VERSION: u32 = 1;

/// Shallow merge: top-level keys of `patch` overwrite those in `base`
pub fn merge_context(base: &mut Context, patch: Context) {
    for (key, value) in patch {
        base.insert(key, value);
    }
}

/// Convert a JSON value into a context patch. Only objects are accepted.
pub fn context_from_value(value: Value) -> FlowResult<Context> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Context::new()),
        other => Err(FlowError::navigation(format!(
            "context patch must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A change to an instance's context
pub enum ContextUpdate {
    /// Shallow-merge the given keys
    Merge(Context),
    /// Replace the whole context
    Replace(Context),
    /// Compute a patch from the previous context, then shallow-merge it
    With(Box<dyn FnOnce(&Context) -> Context + Send>),
}

impl ContextUpdate {
    pub fn merge(patch: Context) -> Self {
        Self::Merge(patch)
    }

    pub fn replace(context: Context) -> Self {
        Self::Replace(context)
    }

    pub fn with<F>(updater: F) -> Self
    where
        F: FnOnce(&Context) -> Context + Send + 'static,
    {
        Self::With(Box::new(updater))
    }

    /// Build a merge update from a JSON object
    pub fn from_value(value: Value) -> FlowResult<Self> {
        context_from_value(value).map(Self::Merge)
    }

    /// Produce the context that results from applying this update to `current`.
    /// `current` itself is never modified.
    pub fn apply(self, current: &Context) -> Context {
        match self {
            ContextUpdate::Merge(patch) => {
                let mut next = current.clone();
                merge_context(&mut next, patch);
                next
            }
            ContextUpdate::Replace(context) => context,
            ContextUpdate::With(updater) => {
                let patch = updater(current);
                let mut next = current.clone();
                merge_context(&mut next, patch);
                next
            }
        }
    }
}

impl From<Context> for ContextUpdate {
    fn from(patch: Context) -> Self {
        Self::Merge(patch)
    }
}

impl std::fmt::Debug for ContextUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextUpdate::Merge(patch) => f.debug_tuple("Merge").field(patch).finish(),
            ContextUpdate::Replace(context) => f.debug_tuple("Replace").field(context).finish(),
            ContextUpdate::With(_) => f.write_str("With(<updater>)"),
        }
    }
}

/// Instance lifecycle status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    /// Flow is in progress
    #[default]
    Active,
    /// A terminal step has been reached
    Completed,
}

/// How a path entry was reached
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Entry step of the flow
    #[default]
    Start,
    /// Reached by answering the previous step
    Next,
    /// Reached by explicitly skipping the previous step
    Skip,
}

/// One entry in the transition log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathEntry {
    pub step_id: StepId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub via: EntryKind,
}

impl PathEntry {
    pub fn new(step_id: impl Into<StepId>, via: EntryKind) -> Self {
        Self {
            step_id: step_id.into(),
            timestamp: Utc::now(),
            via,
        }
    }
}

/// Full runtime state of a flow instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowInstanceState {
    pub flow_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Current step, always a key of the owning definition
    pub step_id: StepId,

    pub context: Context,

    pub status: FlowStatus,

    /// Every step visited, in order; never shrinks except on reset
    pub history: Vec<StepId>,

    /// Transition stack; `back()` pops from here
    pub path: Vec<PathEntry>,

    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_restoring: bool,
}

impl FlowInstanceState {
    /// Fresh state positioned at the definition's start step
    pub fn fresh(
        definition: &FlowDefinition,
        instance_id: Option<String>,
        initial_context: Context,
    ) -> Self {
        let start = definition.start().to_string();
        let now = Utc::now();
        let completed = definition.is_terminal(&start);
        Self {
            flow_id: definition.id().to_string(),
            variant_id: definition.variant_id().map(str::to_string),
            instance_id,
            step_id: start.clone(),
            context: initial_context,
            status: if completed {
                FlowStatus::Completed
            } else {
                FlowStatus::Active
            },
            history: vec![start.clone()],
            path: vec![PathEntry {
                step_id: start,
                timestamp: now,
                via: EntryKind::Start,
            }],
            started_at: now,
            completed_at: completed.then_some(now),
            is_restoring: false,
        }
    }

    /// Adopt a persisted record. Fails with `StaleData` when the record's
    /// step, or any step on its path, no longer exists in the definition.
    pub fn from_persisted(
        definition: &FlowDefinition,
        instance_id: Option<String>,
        record: PersistedFlowState,
    ) -> FlowResult<Self> {
        if !definition.contains(&record.step_id) {
            return Err(FlowError::stale(format!(
                "persisted step '{}' is not part of flow '{}'",
                record.step_id,
                definition.id()
            )));
        }

        // `back()` walks the path, so every entry must still be a step
        if let Some(entry) = record
            .path
            .iter()
            .find(|entry| !definition.contains(&entry.step_id))
        {
            return Err(FlowError::stale(format!(
                "persisted path visits step '{}' which is not part of flow '{}'",
                entry.step_id,
                definition.id()
            )));
        }

        // Status follows the current graph: the step may have gained or lost
        // its successors since the record was written
        let (status, completed_at) = if definition.is_terminal(&record.step_id) {
            (
                FlowStatus::Completed,
                Some(record.completed_at.unwrap_or(record.saved_at)),
            )
        } else {
            (FlowStatus::Active, None)
        };

        // Records written without a path still restore to a usable stack
        let path = if record.path.is_empty() {
            vec![PathEntry {
                step_id: record.step_id.clone(),
                timestamp: record.started_at,
                via: EntryKind::Start,
            }]
        } else {
            record.path
        };

        Ok(Self {
            flow_id: definition.id().to_string(),
            variant_id: definition.variant_id().map(str::to_string),
            instance_id,
            step_id: record.step_id,
            context: record.context,
            status,
            history: record.history,
            path,
            started_at: record.started_at,
            completed_at,
            is_restoring: false,
        })
    }

    /// Durable projection stamped with the current time
    pub fn to_persisted(&self) -> PersistedFlowState {
        PersistedFlowState {
            step_id: self.step_id.clone(),
            context: self.context.clone(),
            history: self.history.clone(),
            path: self.path.clone(),
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            saved_at: Utc::now(),
            version: RECORD_VERSION,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == FlowStatus::Completed
    }
}

/// Durable projection of `FlowInstanceState`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedFlowState {
    pub step_id: StepId,

    #[serde(default)]
    pub context: Context,

    #[serde(default)]
    pub history: Vec<StepId>,

    #[serde(default)]
    pub path: Vec<PathEntry>,

    #[serde(default)]
    pub status: FlowStatus,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub saved_at: DateTime<Utc>,

    #[serde(default = "default_record_version")]
    pub version: u32,
}

fn default_record_version() -> u32 {
    RECORD_VERSION
}

impl PersistedFlowState {
    /// Whether the record has outlived `ttl` as of `now`
    pub fn is_expired_at(&self, ttl: Option<chrono::Duration>, now: DateTime<Utc>) -> bool {
        match ttl {
            Some(ttl) => self.saved_at + ttl < now,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FlowSpec, StepSpec};
    use serde_json::json;

    fn object(value: Value) -> Context {
        value.as_object().cloned().unwrap()
    }

    fn onboarding() -> FlowDefinition {
        FlowSpec::new("onboarding", "welcome")
            .step("welcome", StepSpec::to("profile"))
            .step("profile", StepSpec::to("complete"))
            .step("complete", StepSpec::terminal())
            .build()
            .unwrap()
    }

    #[test]
    fn test_merge_is_shallow() {
        let mut base = object(json!({"foo": 1, "nested": {"a": 1}}));
        merge_context(&mut base, object(json!({"bar": 2, "nested": {"b": 2}})));
        assert_eq!(
            Value::Object(base),
            json!({"foo": 1, "bar": 2, "nested": {"b": 2}})
        );
    }

    #[test]
    fn test_context_update_variants() {
        let current = object(json!({"count": 1, "name": "a"}));

        let merged = ContextUpdate::merge(object(json!({"name": "b"}))).apply(&current);
        assert_eq!(Value::Object(merged), json!({"count": 1, "name": "b"}));

        let replaced = ContextUpdate::replace(object(json!({"only": true}))).apply(&current);
        assert_eq!(Value::Object(replaced), json!({"only": true}));

        let updated = ContextUpdate::with(|prev| {
            let count = prev.get("count").and_then(Value::as_i64).unwrap_or(0);
            object(json!({"count": count + 1}))
        })
        .apply(&current);
        assert_eq!(Value::Object(updated), json!({"count": 2, "name": "a"}));

        // the source context is left alone
        assert_eq!(current.get("count"), Some(&json!(1)));
    }

    #[test]
    fn test_context_from_value_rejects_scalars() {
        assert!(context_from_value(json!({"a": 1})).is_ok());
        assert!(context_from_value(Value::Null).unwrap().is_empty());
        assert!(context_from_value(json!("text")).is_err());
    }

    #[test]
    fn test_fresh_state() {
        let def = onboarding();
        let state = FlowInstanceState::fresh(&def, Some("t1".into()), object(json!({"x": 1})));
        assert_eq!(state.step_id, "welcome");
        assert_eq!(state.history, vec!["welcome".to_string()]);
        assert_eq!(state.path.len(), 1);
        assert_eq!(state.path[0].via, EntryKind::Start);
        assert_eq!(state.status, FlowStatus::Active);
        assert!(state.completed_at.is_none());
        assert_eq!(state.instance_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_persisted_roundtrip_through_state() {
        let def = onboarding();
        let mut state = FlowInstanceState::fresh(&def, None, Context::new());
        state.step_id = "profile".into();
        state.history.push("profile".into());
        state.path.push(PathEntry::new("profile", EntryKind::Next));

        let record = state.to_persisted();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"stepId\":\"profile\""));
        assert!(json.contains("savedAt"));

        let parsed: PersistedFlowState = serde_json::from_str(&json).unwrap();
        let restored = FlowInstanceState::from_persisted(&def, None, parsed).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_stale_step_is_rejected() {
        let def = onboarding();
        let mut record = FlowInstanceState::fresh(&def, None, Context::new()).to_persisted();
        record.step_id = "removed-step".into();

        let err = FlowInstanceState::from_persisted(&def, None, record).unwrap_err();
        assert!(matches!(err, FlowError::StaleData(_)));
    }

    #[test]
    fn test_path_through_removed_step_is_stale() {
        let def = onboarding();
        let mut record = FlowInstanceState::fresh(&def, None, Context::new()).to_persisted();
        record.step_id = "profile".into();
        record.path.push(PathEntry::new("legacy", EntryKind::Next));
        record.path.push(PathEntry::new("profile", EntryKind::Next));

        let err = FlowInstanceState::from_persisted(&def, None, record).unwrap_err();
        assert!(matches!(err, FlowError::StaleData(_)));
        assert!(err.to_string().contains("legacy"));
    }

    #[test]
    fn test_status_follows_current_graph() {
        let def = onboarding();
        let base = FlowInstanceState::fresh(&def, None, Context::new()).to_persisted();

        // completed under an older graph where `profile` was terminal
        let mut finished = base.clone();
        finished.step_id = "profile".into();
        finished.status = FlowStatus::Completed;
        finished.completed_at = Some(finished.saved_at);
        let restored = FlowInstanceState::from_persisted(&def, None, finished).unwrap();
        assert_eq!(restored.status, FlowStatus::Active);
        assert!(restored.completed_at.is_none());

        // `complete` is terminal now, whatever the record says
        let mut reached = base;
        reached.step_id = "complete".into();
        let restored = FlowInstanceState::from_persisted(&def, None, reached.clone()).unwrap();
        assert_eq!(restored.status, FlowStatus::Completed);
        assert_eq!(restored.completed_at, Some(reached.saved_at));
    }

    #[test]
    fn test_expiry() {
        let def = onboarding();
        let record = FlowInstanceState::fresh(&def, None, Context::new()).to_persisted();
        let later = record.saved_at + chrono::Duration::seconds(61);

        assert!(record.is_expired_at(Some(chrono::Duration::seconds(60)), later));
        assert!(!record.is_expired_at(Some(chrono::Duration::seconds(120)), later));
        assert!(!record.is_expired_at(None, later));
    }

    #[test]
    fn test_record_defaults_for_older_documents() {
        let json = r#"{"stepId":"welcome","startedAt":"2024-01-01T00:00:00Z","savedAt":"2024-01-01T00:00:00Z"}"#;
        let record: PersistedFlowState = serde_json::from_str(json).unwrap();
        assert_eq!(record.version, RECORD_VERSION);
        assert_eq!(record.status, FlowStatus::Active);

        let restored = FlowInstanceState::from_persisted(&onboarding(), None, record).unwrap();
        assert_eq!(restored.path.len(), 1);
        assert_eq!(restored.path[0].step_id, "welcome");
    }
}
