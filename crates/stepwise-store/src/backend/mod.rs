//! Storage backends

#[cfg(feature = "file-backend")]
pub mod file;
pub mod memory;
