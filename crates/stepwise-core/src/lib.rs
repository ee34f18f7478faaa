// Stepwise Core - Foundation types and traits for the Stepwise flow engine
//
// This crate holds everything the storage backends and the runtime share:
// validated flow definitions, instance state and its persisted projection,
// the storage adapter trait with its key strategies, and event payloads.

pub mod definition;
pub mod error;
pub mod event;
pub mod state;
pub mod storage;

// Re-export core types
pub use definition::{
    FlowDefinition, FlowSpec, NextSpec, NextStep, Resolver, ResolverBuilder, StepNode, StepSpec,
};
pub use error::{ErrorKind, FlowError, FlowResult};
pub use event::{CompletionEvent, Direction, FlowEvent, TransitionEvent};
pub use state::{
    context_from_value, merge_context, Context, ContextUpdate, EntryKind, FlowInstanceState,
    FlowStatus, PathEntry, PersistedFlowState, StepId, RECORD_VERSION,
};
pub use storage::{
    FlowInstanceKeys, InstanceScope, KeyStrategy, KeyStrategyKind, ParsedKey, StorageAdapter,
    VariantScopedKeys,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default storage key prefix
pub const DEFAULT_PREFIX: &str = "stepwise";

/// Default debounce window for coalesced saves, in milliseconds
pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 300;
