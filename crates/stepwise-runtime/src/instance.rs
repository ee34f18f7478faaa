//! Flow instance state machine
//!
//! A `FlowInstance` is one independent run of a flow. Navigation takes
//! `&mut self`, so calls on one instance are strictly sequential and each
//! observes the fully applied result of the previous one. Every operation
//! computes its outcome before touching state: a failed call leaves the
//! instance exactly as it was.
//!
//! Persistence is a side effect of navigation. Automatic writes never fail
//! a navigation call; their errors go to the persistence error callback and
//! the in-memory state stays authoritative.

use chrono::Utc;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use stepwise_core::{
    CompletionEvent, Context, ContextUpdate, Direction, EntryKind, FlowDefinition, FlowError,
    FlowEvent, FlowInstanceState, FlowResult, FlowStatus, InstanceScope, PathEntry, StepId,
    TransitionEvent,
};
use stepwise_store::Persister;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{panic_message, EventDispatcher};
use crate::options::{FlowOptions, PersistenceErrorCallback, SaveMode};
use crate::saver::DebouncedSave;

/// Input to `next()` and `skip()`: an optional context change and an
/// optional explicit destination.
///
/// ```rust
/// # use stepwise_runtime::Advance;
/// # use serde_json::json;
/// let plain = Advance::from(());
/// let answer = Advance::patch(json!({"plan": "pro"})).unwrap();
/// let chosen = Advance::to("business");
/// ```
#[derive(Debug, Default)]
pub struct Advance {
    update: Option<ContextUpdate>,
    target: Option<StepId>,
}

impl Advance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Go to `target`, which must be one of the current step's targets.
    /// Required on branching steps without a resolver.
    pub fn to(target: impl Into<StepId>) -> Self {
        Self::new().target(target)
    }

    /// Shallow-merge a JSON object into the context before moving on
    pub fn patch(value: Value) -> FlowResult<Self> {
        Ok(Self::new().update(ContextUpdate::from_value(value)?))
    }

    /// Derive the patch from the previous context
    pub fn with<F>(updater: F) -> Self
    where
        F: FnOnce(&Context) -> Context + Send + 'static,
    {
        Self::new().update(ContextUpdate::with(updater))
    }

    pub fn target(mut self, target: impl Into<StepId>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn update(mut self, update: impl Into<ContextUpdate>) -> Self {
        self.update = Some(update.into());
        self
    }
}

impl From<()> for Advance {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<Context> for Advance {
    fn from(patch: Context) -> Self {
        Self::new().update(patch)
    }
}

impl From<ContextUpdate> for Advance {
    fn from(update: ContextUpdate) -> Self {
        Self::new().update(update)
    }
}

/// Logs persistence failures and forwards them to the configured callback
#[derive(Clone)]
pub(crate) struct ErrorReporter {
    flow_id: String,
    instance_id: Option<String>,
    callback: Option<PersistenceErrorCallback>,
}

impl ErrorReporter {
    pub(crate) fn report(&self, err: &FlowError) {
        warn!(
            flow_id = %self.flow_id,
            instance_id = ?self.instance_id,
            error = %err,
            "Flow persistence failed"
        );
        if let Some(callback) = &self.callback {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(err))) {
                error!(
                    callback = "on_persistence_error",
                    panic = %panic_message(&*panic),
                    "Flow callback panicked"
                );
            }
        }
    }
}

/// One run of a flow
pub struct FlowInstance {
    definition: Arc<FlowDefinition>,
    state: FlowInstanceState,
    instance_id: Option<String>,
    variant_id: Option<String>,
    initial_context: Context,
    persister: Option<Persister>,
    save_mode: SaveMode,
    saver: DebouncedSave,
    dispatcher: EventDispatcher,
    reporter: ErrorReporter,
}

impl FlowInstance {
    /// Create an instance positioned at the start step.
    ///
    /// With a persister configured the instance starts out restoring and
    /// rejects navigation until [`restore`](Self::restore) has run. Use
    /// [`open`](Self::open) to do both in one call.
    pub fn new(definition: impl Into<Arc<FlowDefinition>>, options: FlowOptions) -> Self {
        let definition = definition.into();
        let variant_id = options
            .variant_id
            .clone()
            .or_else(|| definition.variant_id().map(str::to_string));

        let mut state = fresh_state(
            &definition,
            options.instance_id.clone(),
            variant_id.clone(),
            options.initial_context.clone(),
        );
        state.is_restoring = options.persister.is_some();

        let reporter = ErrorReporter {
            flow_id: definition.id().to_string(),
            instance_id: options.instance_id.clone(),
            callback: options.on_persistence_error.clone(),
        };

        Self {
            dispatcher: EventDispatcher::from_options(&options),
            saver: DebouncedSave::new(options.save_debounce),
            save_mode: options.save_mode,
            persister: options.persister,
            initial_context: options.initial_context,
            instance_id: options.instance_id,
            variant_id,
            state,
            reporter,
            definition,
        }
    }

    /// Create an instance and restore any persisted state
    pub async fn open(definition: impl Into<Arc<FlowDefinition>>, options: FlowOptions) -> Self {
        let mut instance = Self::new(definition, options);
        instance.restore().await;
        instance
    }

    /// Load persisted state, falling back to a fresh start.
    ///
    /// A record is adopted only if it exists, has not expired, and points at
    /// a step this definition still has. Returns whether a record was
    /// adopted. Load failures are reported, never returned.
    pub async fn restore(&mut self) -> bool {
        self.saver.cancel().await;
        self.state.is_restoring = true;

        let restored = match &self.persister {
            Some(persister) => match persister.load(self.definition.id(), &self.scope()).await {
                Ok(Some(record)) => match FlowInstanceState::from_persisted(
                    &self.definition,
                    self.instance_id.clone(),
                    record,
                ) {
                    Ok(mut state) => {
                        state.variant_id = self.variant_id.clone();
                        Some(state)
                    }
                    Err(e) => {
                        warn!(
                            flow_id = %self.definition.id(),
                            instance_id = ?self.instance_id,
                            error = %e,
                            "Discarding stale flow record"
                        );
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    self.reporter.report(&e);
                    None
                }
            },
            None => None,
        };

        let adopted = restored.is_some();
        self.state = match restored {
            Some(state) => state,
            None => self.fresh(),
        };
        self.state.is_restoring = false;

        if adopted {
            info!(
                flow_id = %self.definition.id(),
                instance_id = ?self.instance_id,
                step = %self.state.step_id,
                "Restored flow instance"
            );
            self.dispatcher.emit(FlowEvent::Restored {
                flow_id: self.definition.id().to_string(),
                instance_id: self.instance_id.clone(),
                step_id: self.state.step_id.clone(),
            });
        }
        adopted
    }

    /// Answer the current step and move on. Returns the new step id.
    ///
    /// Accepts `()`, a context patch, a [`ContextUpdate`], or an [`Advance`]
    /// carrying an explicit target.
    pub async fn next(&mut self, input: impl Into<Advance>) -> FlowResult<StepId> {
        self.advance(input.into(), EntryKind::Next).await
    }

    /// Like [`next`](Self::next), but marks the destination as reached by
    /// skipping the current step.
    pub async fn skip(&mut self, input: impl Into<Advance>) -> FlowResult<StepId> {
        self.advance(input.into(), EntryKind::Skip).await
    }

    async fn advance(&mut self, input: Advance, via: EntryKind) -> FlowResult<StepId> {
        self.ensure_ready()?;
        if self.state.is_completed() {
            return Err(FlowError::navigation(format!(
                "flow '{}' already completed at step '{}'",
                self.definition.id(),
                self.state.step_id
            )));
        }

        let Advance { update, target } = input;
        let old_context = self.state.context.clone();
        let new_context = match update {
            Some(update) => update.apply(&old_context),
            None => old_context.clone(),
        };
        let from = self.state.step_id.clone();
        let to = self
            .definition
            .resolve(&from, &new_context, target.as_deref())?;
        let completed = self.definition.is_terminal(&to);

        let now = Utc::now();
        self.state.context = new_context;
        self.state.step_id = to.clone();
        self.state.history.push(to.clone());
        self.state.path.push(PathEntry {
            step_id: to.clone(),
            timestamp: now,
            via,
        });
        if completed {
            self.state.status = FlowStatus::Completed;
            self.state.completed_at = Some(now);
        }

        debug!(
            flow_id = %self.definition.id(),
            instance_id = ?self.instance_id,
            from = %from,
            to = %to,
            via = ?via,
            "Flow advanced"
        );

        let event = TransitionEvent {
            flow_id: self.definition.id().to_string(),
            instance_id: self.instance_id.clone(),
            from,
            to: to.clone(),
            direction: Direction::Forward,
            via: Some(via),
            old_context,
            new_context: self.state.context.clone(),
        };
        let completion = completed.then(|| CompletionEvent {
            flow_id: self.definition.id().to_string(),
            instance_id: self.instance_id.clone(),
            step_id: to.clone(),
            context: self.state.context.clone(),
        });
        if completed {
            info!(
                flow_id = %self.definition.id(),
                instance_id = ?self.instance_id,
                step = %to,
                "Flow completed"
            );
        }
        self.dispatcher.transition(&event, completion.as_ref());

        self.persist().await;
        Ok(to)
    }

    /// Return to the previous step on the path. Returns `false` when already
    /// at the first step. History keeps growing; context is kept.
    pub async fn back(&mut self) -> FlowResult<bool> {
        self.ensure_ready()?;
        if self.state.is_completed() {
            return Err(FlowError::navigation(format!(
                "flow '{}' is completed; reset it to start over",
                self.definition.id()
            )));
        }
        if !self.can_go_back() {
            debug!(flow_id = %self.definition.id(), "Already at the first step");
            return Ok(false);
        }

        let from = self.state.step_id.clone();
        let to = self.state.path[self.state.path.len() - 2].step_id.clone();
        self.state.path.pop();
        self.state.step_id = to.clone();
        self.state.history.push(to.clone());

        debug!(
            flow_id = %self.definition.id(),
            instance_id = ?self.instance_id,
            from = %from,
            to = %to,
            "Flow went back"
        );

        let event = TransitionEvent {
            flow_id: self.definition.id().to_string(),
            instance_id: self.instance_id.clone(),
            from,
            to,
            direction: Direction::Backward,
            via: None,
            old_context: self.state.context.clone(),
            new_context: self.state.context.clone(),
        };
        self.dispatcher.transition(&event, None);

        self.persist().await;
        Ok(true)
    }

    /// Change the context without moving. The change is persisted like any
    /// navigation.
    pub async fn set_context(&mut self, update: impl Into<ContextUpdate>) -> FlowResult<()> {
        self.ensure_ready()?;
        self.state.context = update.into().apply(&self.state.context);

        self.dispatcher.emit(FlowEvent::ContextUpdated {
            flow_id: self.definition.id().to_string(),
            instance_id: self.instance_id.clone(),
            context: self.state.context.clone(),
        });

        self.persist().await;
        Ok(())
    }

    /// Start over: fresh in-memory state, pending writes cancelled, and the
    /// persisted record removed.
    pub async fn reset(&mut self) -> FlowResult<()> {
        self.ensure_ready()?;
        self.saver.cancel().await;
        self.state = self.fresh();

        if let Some(persister) = &self.persister {
            if let Err(e) = persister.remove(self.definition.id(), &self.scope()).await {
                self.reporter.report(&e);
            }
        }

        info!(flow_id = %self.definition.id(), instance_id = ?self.instance_id, "Flow reset");
        self.dispatcher.emit(FlowEvent::Reset {
            flow_id: self.definition.id().to_string(),
            instance_id: self.instance_id.clone(),
        });
        Ok(())
    }

    /// Write the current state now, superseding any pending debounced write
    pub async fn save(&self) -> FlowResult<()> {
        self.ensure_ready()?;
        let persister = self.persister.as_ref().ok_or_else(|| {
            FlowError::config(format!(
                "flow '{}' has no persister configured",
                self.definition.id()
            ))
        })?;
        self.saver.cancel().await;
        persister.save_state(&self.state).await
    }

    /// Perform a pending debounced write immediately. No-op when nothing
    /// is pending.
    pub async fn flush(&self) -> FlowResult<()> {
        if self.saver.cancel().await {
            self.save().await
        } else {
            Ok(())
        }
    }

    /// Delete the persisted record and cancel pending writes. In-memory
    /// state is left untouched.
    pub async fn remove(&self) -> FlowResult<()> {
        self.saver.cancel().await;
        match &self.persister {
            Some(persister) => persister.remove(self.definition.id(), &self.scope()).await,
            None => Ok(()),
        }
    }

    async fn persist(&self) {
        let Some(persister) = &self.persister else {
            return;
        };
        match self.save_mode {
            SaveMode::Always => {
                if let Err(e) = persister.save_state(&self.state).await {
                    self.reporter.report(&e);
                }
            }
            SaveMode::Debounced => {
                self.saver
                    .schedule(persister.clone(), self.state.clone(), self.reporter.clone());
            }
            SaveMode::Manual => {}
        }
    }

    fn ensure_ready(&self) -> FlowResult<()> {
        if self.state.is_restoring {
            return Err(FlowError::state(format!(
                "flow '{}' is still restoring",
                self.definition.id()
            )));
        }
        Ok(())
    }

    fn fresh(&self) -> FlowInstanceState {
        fresh_state(
            &self.definition,
            self.instance_id.clone(),
            self.variant_id.clone(),
            self.initial_context.clone(),
        )
    }

    fn scope(&self) -> InstanceScope {
        InstanceScope {
            instance_id: self.instance_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }

    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    pub fn flow_id(&self) -> &str {
        self.definition.id()
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn variant_id(&self) -> Option<&str> {
        self.variant_id.as_deref()
    }

    /// Borrow the full state
    pub fn state(&self) -> &FlowInstanceState {
        &self.state
    }

    /// Owned copy of the full state
    pub fn snapshot(&self) -> FlowInstanceState {
        self.state.clone()
    }

    pub fn current_step(&self) -> &str {
        &self.state.step_id
    }

    /// View-layer annotations of the current step
    pub fn current_meta(&self) -> Option<&Value> {
        self.definition
            .step(&self.state.step_id)
            .and_then(|node| node.meta.as_ref())
    }

    pub fn context(&self) -> &Context {
        &self.state.context
    }

    pub fn status(&self) -> FlowStatus {
        self.state.status
    }

    pub fn history(&self) -> &[StepId] {
        &self.state.history
    }

    pub fn path(&self) -> &[PathEntry] {
        &self.state.path
    }

    pub fn is_restoring(&self) -> bool {
        self.state.is_restoring
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    pub fn can_go_back(&self) -> bool {
        self.state.path.len() > 1
    }
}

fn fresh_state(
    definition: &FlowDefinition,
    instance_id: Option<String>,
    variant_id: Option<String>,
    initial_context: Context,
) -> FlowInstanceState {
    let mut state = FlowInstanceState::fresh(definition, instance_id, initial_context);
    state.variant_id = variant_id;
    state
}

impl std::fmt::Debug for FlowInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowInstance")
            .field("flow_id", &self.definition.id())
            .field("instance_id", &self.instance_id)
            .field("step_id", &self.state.step_id)
            .field("status", &self.state.status)
            .field("save_mode", &self.save_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepwise_core::{FlowSpec, StepSpec};

    fn ctx(value: Value) -> Context {
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

    #[tokio::test]
    async fn test_in_memory_instance_is_ready_immediately() {
        let mut flow = FlowInstance::new(onboarding(), FlowOptions::new());
        assert!(!flow.is_restoring());
        assert_eq!(flow.next(()).await.unwrap(), "profile");
    }

    #[tokio::test]
    async fn test_failed_navigation_leaves_state_untouched() {
        let mut flow = FlowInstance::new(onboarding(), FlowOptions::new());
        let before = flow.snapshot();

        let err = flow
            .next(Advance::to("complete").update(ctx(json!({"name": "Ada"}))))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Navigation(_)));
        assert_eq!(flow.snapshot(), before);
    }

    #[tokio::test]
    async fn test_back_at_start_is_noop() {
        let mut flow = FlowInstance::new(onboarding(), FlowOptions::new());
        assert!(!flow.back().await.unwrap());
        assert_eq!(flow.history(), ["welcome"]);
    }

    #[tokio::test]
    async fn test_back_after_completion_fails() {
        let mut flow = FlowInstance::new(onboarding(), FlowOptions::new());
        flow.next(()).await.unwrap();
        flow.next(()).await.unwrap();
        assert!(flow.is_completed());

        let err = flow.back().await.unwrap_err();
        assert!(matches!(err, FlowError::Navigation(_)));
        assert_eq!(flow.current_step(), "complete");
    }

    #[tokio::test]
    async fn test_save_without_persister_is_config_error() {
        let flow = FlowInstance::new(onboarding(), FlowOptions::new());
        let err = flow.save().await.unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
        flow.flush().await.unwrap();
        flow.remove().await.unwrap();
    }

    #[tokio::test]
    async fn test_updater_sees_previous_context() {
        let mut flow = FlowInstance::new(
            onboarding(),
            FlowOptions::new().initial_context(ctx(json!({"visits": 1}))),
        );
        flow.next(Advance::with(|prev| {
            let visits = prev.get("visits").and_then(Value::as_i64).unwrap_or(0);
            ctx(json!({"visits": visits + 1}))
        }))
        .await
        .unwrap();
        assert_eq!(flow.context().get("visits"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_start_at_terminal_step_is_completed() {
        let def = FlowSpec::new("one", "only")
            .step("only", StepSpec::terminal())
            .build()
            .unwrap();
        let mut flow = FlowInstance::new(def, FlowOptions::new());
        assert!(flow.is_completed());
        assert!(flow.state().completed_at.is_some());
        assert!(matches!(
            flow.next(()).await.unwrap_err(),
            FlowError::Navigation(_)
        ));
    }

    #[test]
    fn test_advance_patch_rejects_non_objects() {
        assert!(Advance::patch(json!(["not", "an", "object"])).is_err());
        assert!(Advance::patch(json!({"ok": true})).is_ok());
    }
}
