//! Stepwise Store - storage backends and persistence for flow instances
//!
//! Backends implement [`stepwise_core::StorageAdapter`]; the [`Persister`]
//! layers key layout, JSON encoding, versioning and TTL expiry on top.
//!
//! ## Storage Backends
//!
//! - **InMemoryStorage**: Fast, ephemeral storage cleared on restart (default)
//! - **FileStorage**: Persistent JSON file storage that survives restarts
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use stepwise_store::{FileStorage, Persister};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = FileStorage::new("./drafts.json").await?;
//! let persister = Persister::new(Arc::new(storage))
//!     .with_prefix("app")
//!     .with_ttl(Duration::from_secs(7 * 24 * 3600));
//! let drafts = persister.list("task-form").await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod persister;

#[cfg(feature = "file-backend")]
pub use backend::file::FileStorage;
pub use backend::memory::InMemoryStorage;
pub use persister::{MigrateFn, Persister, PersisterConfig, StoredInstance};

// Re-export the adapter contract
pub use stepwise_core::{InstanceScope, KeyStrategy, StorageAdapter};
