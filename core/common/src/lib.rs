//! Common types shared across davsync crates.
//!
//! This crate provides the error model and the relative-path type used by
//! the storage adapters and the synchronization engine.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::RelPath;
