//! Instance configuration
//!
//! Everything a flow instance can be configured with besides its
//! definition. All of it is optional: an instance built from
//! `FlowOptions::default()` keeps its state in memory only and notifies
//! nobody.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use stepwise_core::{
    CompletionEvent, Context, FlowError, FlowEvent, TransitionEvent, DEFAULT_SAVE_DEBOUNCE_MS,
};
use stepwise_store::Persister;
use tokio::sync::mpsc;

/// When state changes are written through the persister
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Write after every state change
    #[default]
    Always,
    /// Coalesce writes; only the last change within the window is written
    Debounced,
    /// Write only on explicit `save()` / `flush()`
    Manual,
}

pub type TransitionCallback = Arc<dyn Fn(&TransitionEvent) + Send + Sync>;
pub type CompletionCallback = Arc<dyn Fn(&CompletionEvent) + Send + Sync>;
pub type PersistenceErrorCallback = Arc<dyn Fn(&FlowError) + Send + Sync>;

/// Flow instance options
#[derive(Clone)]
pub struct FlowOptions {
    pub(crate) persister: Option<Persister>,
    pub(crate) save_mode: SaveMode,
    pub(crate) save_debounce: Duration,
    pub(crate) on_persistence_error: Option<PersistenceErrorCallback>,
    pub(crate) instance_id: Option<String>,
    pub(crate) variant_id: Option<String>,
    pub(crate) initial_context: Context,
    pub(crate) on_next: Option<TransitionCallback>,
    pub(crate) on_back: Option<TransitionCallback>,
    pub(crate) on_transition: Option<TransitionCallback>,
    pub(crate) on_complete: Option<CompletionCallback>,
    pub(crate) event_tx: Option<mpsc::Sender<FlowEvent>>,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            persister: None,
            save_mode: SaveMode::default(),
            save_debounce: Duration::from_millis(DEFAULT_SAVE_DEBOUNCE_MS),
            on_persistence_error: None,
            instance_id: None,
            variant_id: None,
            initial_context: Context::new(),
            on_next: None,
            on_back: None,
            on_transition: None,
            on_complete: None,
            event_tx: None,
        }
    }
}

impl FlowOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist state through `persister`; without one, state lives in memory only
    pub fn persister(mut self, persister: Persister) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn save_mode(mut self, mode: SaveMode) -> Self {
        self.save_mode = mode;
        self
    }

    /// Debounce window for `SaveMode::Debounced`
    pub fn save_debounce(mut self, window: Duration) -> Self {
        self.save_debounce = window;
        self
    }

    pub fn save_debounce_ms(self, millis: u64) -> Self {
        self.save_debounce(Duration::from_millis(millis))
    }

    /// Called with every persistence failure. Failures are logged whether
    /// or not a callback is set.
    pub fn on_persistence_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlowError) + Send + Sync + 'static,
    {
        self.on_persistence_error = Some(Arc::new(f));
        self
    }

    /// Run an independent instance; `None` selects the shared default instance
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Override the definition's variant id
    pub fn variant_id(mut self, variant_id: impl Into<String>) -> Self {
        self.variant_id = Some(variant_id.into());
        self
    }

    /// Context a fresh instance starts with
    pub fn initial_context(mut self, context: Context) -> Self {
        self.initial_context = context;
        self
    }

    pub fn on_next<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransitionEvent) + Send + Sync + 'static,
    {
        self.on_next = Some(Arc::new(f));
        self
    }

    pub fn on_back<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransitionEvent) + Send + Sync + 'static,
    {
        self.on_back = Some(Arc::new(f));
        self
    }

    pub fn on_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransitionEvent) + Send + Sync + 'static,
    {
        self.on_transition = Some(Arc::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&CompletionEvent) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Stream lifecycle events to a channel. Events are dropped when the
    /// channel is full or closed.
    pub fn event_channel(mut self, tx: mpsc::Sender<FlowEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }
}

impl std::fmt::Debug for FlowOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowOptions")
            .field("persister", &self.persister)
            .field("save_mode", &self.save_mode)
            .field("save_debounce", &self.save_debounce)
            .field("instance_id", &self.instance_id)
            .field("variant_id", &self.variant_id)
            .field("initial_context", &self.initial_context)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = FlowOptions::default();
        assert_eq!(options.save_mode, SaveMode::Always);
        assert_eq!(options.save_debounce, Duration::from_millis(300));
        assert!(options.persister.is_none());
        assert!(options.instance_id.is_none());
    }

    #[test]
    fn test_save_mode_from_config() {
        let mode: SaveMode = serde_json::from_str("\"debounced\"").unwrap();
        assert_eq!(mode, SaveMode::Debounced);
        assert_eq!(serde_json::to_string(&SaveMode::Manual).unwrap(), "\"manual\"");
    }

    #[test]
    fn test_builder() {
        let options = FlowOptions::new()
            .save_mode(SaveMode::Debounced)
            .save_debounce_ms(50)
            .instance_id("t1")
            .variant_id("b")
            .on_next(|_| {});
        assert_eq!(options.save_debounce, Duration::from_millis(50));
        assert_eq!(options.instance_id.as_deref(), Some("t1"));
        assert_eq!(options.variant_id.as_deref(), Some("b"));
        assert!(options.on_next.is_some());
        assert!(options.on_back.is_none());
    }
}
