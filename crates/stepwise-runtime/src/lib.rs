//! Stepwise Runtime - flow instances
//!
//! Drives a validated [`FlowDefinition`](stepwise_core::FlowDefinition)
//! forward and backward, keeps context, notifies observers, and persists
//! state through a [`Persister`](stepwise_store::Persister).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use stepwise_core::{FlowSpec, StepSpec};
//! use stepwise_runtime::{Advance, FlowInstance, FlowOptions, SaveMode};
//! use stepwise_store::{InMemoryStorage, Persister};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let flow = FlowSpec::new("onboarding", "welcome")
//!     .step("welcome", StepSpec::to("profile"))
//!     .step("profile", StepSpec::to("complete"))
//!     .step("complete", StepSpec::terminal())
//!     .build()?;
//!
//! let persister = Persister::new(Arc::new(InMemoryStorage::new()));
//! let options = FlowOptions::new()
//!     .persister(persister)
//!     .save_mode(SaveMode::Debounced)
//!     .on_complete(|done| println!("finished with {:?}", done.context));
//!
//! let mut instance = FlowInstance::open(flow, options).await;
//! instance.next(()).await?;
//! instance.next(Advance::patch(json!({"name": "Ada"}))?).await?;
//! instance.flush().await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod instance;
pub mod options;
mod saver;

pub use dispatcher::EventDispatcher;
pub use instance::{Advance, FlowInstance};
pub use options::{
    CompletionCallback, FlowOptions, PersistenceErrorCallback, SaveMode, TransitionCallback,
};
