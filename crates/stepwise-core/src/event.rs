// Stepwise Core - Lifecycle event payloads
//
// Observers receive these after a navigation call has been applied. They
// are plain data: observers cannot influence engine state through them.

use serde::{Deserialize, Serialize};

use crate::state::{Context, EntryKind, StepId};

/// Direction of a transition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

/// Payload for `on_next`, `on_back` and `on_transition`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub flow_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    pub from: StepId,
    pub to: StepId,
    pub direction: Direction,

    /// How the destination was entered; `None` for backward moves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<EntryKind>,

    pub old_context: Context,
    pub new_context: Context,
}

/// Payload for `on_complete`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub flow_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Terminal step that was reached
    pub step_id: StepId,

    pub context: Context,
}

/// Events streamed to an instance's event channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FlowEvent {
    /// State restored from storage at construction
    Restored {
        flow_id: String,
        instance_id: Option<String>,
        step_id: StepId,
    },
    /// A step transition happened
    Transition(TransitionEvent),
    /// A terminal step was reached
    Completed(CompletionEvent),
    /// Context changed without a transition
    ContextUpdated {
        flow_id: String,
        instance_id: Option<String>,
        context: Context,
    },
    /// Instance was reset to its start step
    Reset {
        flow_id: String,
        instance_id: Option<String>,
    },
}

impl FlowEvent {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            FlowEvent::Restored { .. } => "restored",
            FlowEvent::Transition(_) => "transition",
            FlowEvent::Completed(_) => "completed",
            FlowEvent::ContextUpdated { .. } => "context_updated",
            FlowEvent::Reset { .. } => "reset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_event_serialization() {
        let event = TransitionEvent {
            flow_id: "onboarding".into(),
            instance_id: None,
            from: "welcome".into(),
            to: "profile".into(),
            direction: Direction::Forward,
            via: Some(EntryKind::Next),
            old_context: Context::new(),
            new_context: Context::new(),
        };

        let json = serde_json::to_value(FlowEvent::Transition(event)).unwrap();
        assert_eq!(json["type"], "transition");
        assert_eq!(json["direction"], "forward");
        assert_eq!(json["from"], "welcome");
        assert!(json.get("instanceId").is_none());
    }

    #[test]
    fn test_event_names() {
        let reset = FlowEvent::Reset {
            flow_id: "f".into(),
            instance_id: Some("t1".into()),
        };
        assert_eq!(reset.name(), "reset");
    }
}
