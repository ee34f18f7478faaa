//! Event dispatch
//!
//! Fans lifecycle notifications out to the configured callbacks and the
//! optional event channel. Dispatch is synchronous and ordered: `on_next`
//! or `on_back`, then `on_transition`, then `on_complete`. A panicking
//! callback is logged and skipped; it never aborts navigation.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use stepwise_core::{CompletionEvent, Direction, FlowEvent, TransitionEvent};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::options::{CompletionCallback, FlowOptions, TransitionCallback};

#[derive(Clone, Default)]
pub struct EventDispatcher {
    on_next: Option<TransitionCallback>,
    on_back: Option<TransitionCallback>,
    on_transition: Option<TransitionCallback>,
    on_complete: Option<CompletionCallback>,
    event_tx: Option<mpsc::Sender<FlowEvent>>,
}

impl EventDispatcher {
    pub fn from_options(options: &FlowOptions) -> Self {
        Self {
            on_next: options.on_next.clone(),
            on_back: options.on_back.clone(),
            on_transition: options.on_transition.clone(),
            on_complete: options.on_complete.clone(),
            event_tx: options.event_tx.clone(),
        }
    }

    /// Notify a step transition, and completion when `completion` is given
    pub fn transition(&self, event: &TransitionEvent, completion: Option<&CompletionEvent>) {
        match event.direction {
            Direction::Forward => invoke("on_next", self.on_next.as_deref(), event),
            Direction::Backward => invoke("on_back", self.on_back.as_deref(), event),
        }
        invoke("on_transition", self.on_transition.as_deref(), event);
        self.emit(FlowEvent::Transition(event.clone()));

        if let Some(completion) = completion {
            invoke("on_complete", self.on_complete.as_deref(), completion);
            self.emit(FlowEvent::Completed(completion.clone()));
        }
    }

    /// Forward an event to the channel, if one is attached
    pub fn emit(&self, event: FlowEvent) {
        if let Some(tx) = &self.event_tx {
            let name = event.name();
            if tx.try_send(event).is_err() {
                warn!(event = name, "Failed to send flow event");
            }
        }
    }
}

fn invoke<E>(name: &'static str, callback: Option<&(dyn Fn(&E) + Send + Sync)>, event: &E) {
    let Some(callback) = callback else {
        return;
    };
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
        error!(callback = name, panic = %panic_message(&*panic), "Flow callback panicked");
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
