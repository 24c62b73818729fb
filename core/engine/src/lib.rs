//! davsync synchronization engine.
//!
//! This crate drives one synchronization run between a local directory tree
//! and a [`davsync_storage::RemoteStore`], including:
//! - Push (local → remote) and pull (remote → local) directions
//! - Timestamp-based transfer decisions with a one-second tolerance
//! - Bounded concurrency over a single run-wide semaphore
//! - Atomic downloads with retry and exponential backoff
//! - Optional mirror deletion of destination extras

pub mod config;
pub mod decision;
pub mod engine;
pub mod enumerate;
pub mod progress;
pub mod reconcile;
pub mod retry;
pub mod transfer;

pub use config::{Direction, SyncConfig};
pub use engine::{RunReport, SyncEngine};
pub use progress::{NoopSink, ProgressEvent, ProgressSink};
pub use retry::retry;
