//! Remote store trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use davsync_common::{RelPath, Result};

/// Metadata for one node in a tree, local or remote.
///
/// Produced by listing a directory or stating a single path; never
/// persisted, lives for one enumeration call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Path relative to the tree root.
    pub path: RelPath,
    /// Whether this entry is a directory.
    pub is_directory: bool,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Size in bytes (0 for directories).
    pub size: u64,
}

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Storage adapter for the remote side of a sync.
///
/// All operations are async; large transfers go through streams so a file
/// is never buffered whole. A missing path must surface as
/// [`davsync_common::Error::NotFound`] so callers can tell "absent" from
/// "unreachable"; `exists` relies on that.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store name for logging (e.g. "webdav", "memory").
    fn name(&self) -> &str;

    /// List the immediate children of a directory.
    ///
    /// The listed directory itself is not included. Order is unspecified.
    async fn list(&self, path: &RelPath) -> Result<Vec<Entry>>;

    /// Get metadata for a single path.
    ///
    /// # Errors
    /// - `NotFound` if the path does not exist
    async fn stat(&self, path: &RelPath) -> Result<Entry>;

    /// Check whether a path exists.
    async fn exists(&self, path: &RelPath) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Open a file for streaming reads.
    async fn read_stream(&self, path: &RelPath) -> Result<ByteStream>;

    /// Write a file from a stream of chunks.
    ///
    /// `size` is the expected total length; `modified` is the source
    /// modification time, applied where the backend supports it so that
    /// later timestamp comparisons see the original time.
    async fn write_stream(
        &self,
        path: &RelPath,
        data: ByteStream,
        size: u64,
        modified: DateTime<Utc>,
    ) -> Result<()>;

    /// Create a directory, including missing parents. Idempotent:
    /// an already existing directory is not an error.
    async fn make_dir(&self, path: &RelPath) -> Result<()>;

    /// Remove a file or an empty directory. Removing a path that does not
    /// exist succeeds.
    async fn remove(&self, path: &RelPath) -> Result<()>;

    /// Remove a path and everything below it.
    async fn remove_all(&self, path: &RelPath) -> Result<()>;
}
