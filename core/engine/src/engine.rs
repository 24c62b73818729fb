//! Run orchestration: bounded-concurrency tree walk and reporting.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use davsync_common::{RelPath, Result};
use davsync_storage::{Entry, RemoteStore};

use crate::config::{Direction, SyncConfig};
use crate::decision::needs_transfer;
use crate::progress::ProgressSink;
use crate::{enumerate, reconcile, retry, transfer};

/// Outcome of one synchronization run.
#[derive(Debug)]
pub struct RunReport {
    /// Files whose bytes were moved.
    pub files_transferred: u64,
    /// Files present on both sides and considered unchanged.
    pub files_skipped: u64,
    /// Destination entries removed by mirror deletion.
    pub files_deleted: u64,
    /// Destination directories created.
    pub dirs_created: u64,
    /// One message per failed file or skipped subtree. Transfer failures
    /// land here after their retries are exhausted; mirror deletion
    /// failures are logged only.
    pub errors: Vec<String>,
    /// Wall time of the whole run.
    pub duration: Duration,
}

impl RunReport {
    /// Whether every attempted operation succeeded.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// The first recorded error, if any.
    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }
}

#[derive(Default)]
struct RunStats {
    transferred: AtomicU64,
    skipped: AtomicU64,
    dirs_created: AtomicU64,
    errors: Mutex<Vec<String>>,
}

impl RunStats {
    fn record_error(&self, message: String) {
        self.errors.lock().unwrap().push(message);
    }
}

/// Drives one synchronization run between a local directory and a remote
/// store.
///
/// The run walks the source tree top-down. Within each directory,
/// subdirectories are handled before files, both in ascending byte order
/// of their names; directory listings and all spawned work share one
/// run-wide semaphore of `max_concurrent` permits, so the bound holds
/// across the whole tree, not per directory. A failure under one subtree is recorded and the
/// rest of the run continues; only a failure to enumerate the source root
/// aborts the run.
pub struct SyncEngine {
    runner: Arc<Runner>,
}

impl SyncEngine {
    /// Create an engine for the given configuration.
    ///
    /// # Errors
    /// [`davsync_common::Error::InvalidConfig`] when the configuration is
    /// out of bounds.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn RemoteStore>,
        local_root: impl Into<PathBuf>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        config.validate()?;
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Ok(Self {
            runner: Arc::new(Runner {
                config,
                store,
                local_root: local_root.into(),
                sink,
                semaphore,
                stats: RunStats::default(),
            }),
        })
    }

    /// Execute one run. Consumes the engine: stats are single-use.
    pub async fn run(self) -> Result<RunReport> {
        let runner = self.runner;
        let start = Instant::now();
        info!(
            direction = %runner.config.direction,
            store = runner.store.name(),
            local = %runner.local_root.display(),
            "starting sync run"
        );

        // Both trees are captured before anything is transferred, so files
        // created by this very run never count as extras.
        let snapshots = if runner.config.mirror_deletes {
            Some(runner.capture_snapshots().await?)
        } else {
            None
        };

        runner.clone().sync_dir(RelPath::root(), true).await?;

        let files_deleted = match snapshots {
            Some((source, dest)) => runner.mirror_delete(&source, &dest).await,
            None => 0,
        };

        let stats = &runner.stats;
        let report = RunReport {
            files_transferred: stats.transferred.load(Ordering::SeqCst),
            files_skipped: stats.skipped.load(Ordering::SeqCst),
            files_deleted,
            dirs_created: stats.dirs_created.load(Ordering::SeqCst),
            errors: std::mem::take(&mut *stats.errors.lock().unwrap()),
            duration: start.elapsed(),
        };
        info!(
            transferred = report.files_transferred,
            skipped = report.files_skipped,
            deleted = report.files_deleted,
            errors = report.errors.len(),
            "sync run finished in {:?}",
            report.duration
        );
        Ok(report)
    }
}

struct Runner {
    config: SyncConfig,
    store: Arc<dyn RemoteStore>,
    local_root: PathBuf,
    sink: Arc<dyn ProgressSink>,
    semaphore: Arc<Semaphore>,
    stats: RunStats,
}

impl Runner {
    /// Source and destination trees as they are before the main pass.
    async fn capture_snapshots(&self) -> Result<(Vec<Entry>, Vec<Entry>)> {
        let local = enumerate::snapshot_local(&self.local_root).await?;
        let remote = enumerate::snapshot_remote(self.store.as_ref()).await?;
        Ok(match self.config.direction {
            Direction::Push => (local, remote),
            Direction::Pull => (remote, local),
        })
    }

    async fn mirror_delete(&self, source: &[Entry], dest: &[Entry]) -> u64 {
        let extras = reconcile::deletion_set(source, dest);
        if extras.is_empty() {
            return 0;
        }
        match self.config.direction {
            Direction::Push => {
                reconcile::delete_remote_extras(self.store.as_ref(), &extras).await
            }
            Direction::Pull => reconcile::delete_local_extras(&self.local_root, &extras).await,
        }
    }

    async fn source_entries(&self, dir: &RelPath) -> Result<Vec<Entry>> {
        match self.config.direction {
            Direction::Push => enumerate::list_local_dir(&self.local_root, dir).await,
            Direction::Pull => self.store.list(dir).await,
        }
    }

    /// Destination listing for decision making. A destination directory
    /// that does not exist yet is an empty listing, not an error.
    async fn dest_entries(&self, dir: &RelPath) -> Result<Vec<Entry>> {
        match self.config.direction {
            Direction::Push => match self.store.list(dir).await {
                Ok(entries) => Ok(entries),
                Err(e) if e.is_not_found() => Ok(Vec::new()),
                Err(e) => Err(e),
            },
            Direction::Pull => {
                let fs_dir = dir.to_fs_path(&self.local_root);
                if !fs::try_exists(&fs_dir).await? {
                    return Ok(Vec::new());
                }
                enumerate::list_local_dir(&self.local_root, dir).await
            }
        }
    }

    /// Create the destination counterpart of a source directory.
    async fn ensure_dest_dir(&self, dir: &RelPath) -> Result<()> {
        match self.config.direction {
            Direction::Push => {
                if !self.store.exists(dir).await? {
                    self.store.make_dir(dir).await?;
                    self.stats.dirs_created.fetch_add(1, Ordering::SeqCst);
                }
            }
            Direction::Pull => {
                let fs_dir = dir.to_fs_path(&self.local_root);
                if !fs::try_exists(&fs_dir).await? {
                    fs::create_dir_all(&fs_dir).await?;
                    self.stats.dirs_created.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }

    /// Synchronize one source directory and everything below it.
    ///
    /// Only the root propagates enumeration failures; any deeper failure
    /// is recorded and the subtree skipped, leaving siblings unaffected.
    fn sync_dir(self: Arc<Self>, dir: RelPath, is_root: bool) -> BoxFuture<'static, Result<()>> {
        async move {
            // The listings are I/O like any transfer and draw from the same
            // pool. The permit covers both and is gone before child tasks
            // are spawned, so holding it cannot deadlock deep trees.
            let listing_permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            };
            let mut source = match self.source_entries(&dir).await {
                Ok(entries) => entries,
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    warn!("skipping subtree {dir}: {e}");
                    self.stats.record_error(format!("list {dir}: {e}"));
                    return Ok(());
                }
            };
            let dest = match self.dest_entries(&dir).await {
                Ok(entries) => entries,
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    warn!("skipping subtree {dir}: {e}");
                    self.stats.record_error(format!("list destination {dir}: {e}"));
                    return Ok(());
                }
            };
            drop(listing_permit);
            let dest_modified: std::collections::HashMap<String, DateTime<Utc>> = dest
                .iter()
                .filter(|e| !e.is_directory)
                .map(|e| (e.path.as_str().to_string(), e.modified))
                .collect();

            // Directories first, then files, each in ascending name order.
            source.sort_by(|a, b| {
                b.is_directory
                    .cmp(&a.is_directory)
                    .then_with(|| a.path.cmp(&b.path))
            });

            let mut tasks = JoinSet::new();
            for entry in source {
                let runner = self.clone();
                if entry.is_directory {
                    tasks.spawn(async move {
                        let permit = match runner.semaphore.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return,
                        };
                        if let Err(e) = runner.ensure_dest_dir(&entry.path).await {
                            warn!("skipping subtree {}: {e}", entry.path);
                            runner
                                .stats
                                .record_error(format!("mkdir {}: {e}", entry.path));
                            return;
                        }
                        // The permit must not be held across the recursion:
                        // a deep tree would otherwise pin one permit per
                        // level and starve the transfers below it.
                        drop(permit);
                        let _ = runner.sync_dir(entry.path, false).await;
                    });
                } else {
                    let known = dest_modified.get(entry.path.as_str()).copied();
                    tasks.spawn(async move {
                        let permit = match runner.semaphore.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return,
                        };
                        runner.sync_file(entry, known).await;
                        drop(permit);
                    });
                }
            }
            while tasks.join_next().await.is_some() {}
            Ok(())
        }
        .boxed()
    }

    async fn sync_file(&self, entry: Entry, dest_modified: Option<DateTime<Utc>>) {
        if !needs_transfer(&entry, dest_modified) {
            debug!("unchanged {}", entry.path);
            self.stats.skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let direction = self.config.direction;
        let store = self.store.clone();
        let local_root = self.local_root.clone();
        let sink = self.sink.clone();
        let subject = entry.clone();
        let result = retry::retry(
            self.config.max_retries,
            self.config.retry_base_delay,
            move || {
                let store = store.clone();
                let local_root = local_root.clone();
                let sink = sink.clone();
                let entry = subject.clone();
                async move {
                    match direction {
                        Direction::Push => {
                            transfer::upload(store.as_ref(), &local_root, &entry, sink).await
                        }
                        Direction::Pull => {
                            transfer::download(store.as_ref(), &local_root, &entry, sink).await
                        }
                    }
                }
            },
        )
        .await;

        match result {
            Ok(()) => {
                info!("synced {}", entry.path);
                self.stats.transferred.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!("failed {}: {e}", entry.path);
                self.stats.record_error(format!("{}: {e}", entry.path));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopSink;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use davsync_storage::{ByteStream, MemoryStore};
    use filetime::FileTime;
    use std::sync::atomic::AtomicUsize;

    /// Store whose `list` is slow and counted, for asserting that listings
    /// obey the run-wide concurrency cap.
    struct SlowListStore {
        inner: MemoryStore,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowListStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn peak_lists(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteStore for SlowListStore {
        fn name(&self) -> &str {
            "slow-list"
        }

        async fn list(&self, path: &RelPath) -> Result<Vec<Entry>> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let out = self.inner.list(path).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            out
        }

        async fn stat(&self, path: &RelPath) -> Result<Entry> {
            self.inner.stat(path).await
        }

        async fn read_stream(&self, path: &RelPath) -> Result<ByteStream> {
            self.inner.read_stream(path).await
        }

        async fn write_stream(
            &self,
            path: &RelPath,
            data: ByteStream,
            size: u64,
            modified: DateTime<Utc>,
        ) -> Result<()> {
            self.inner.write_stream(path, data, size, modified).await
        }

        async fn make_dir(&self, path: &RelPath) -> Result<()> {
            self.inner.make_dir(path).await
        }

        async fn remove(&self, path: &RelPath) -> Result<()> {
            self.inner.remove(path).await
        }

        async fn remove_all(&self, path: &RelPath) -> Result<()> {
            self.inner.remove_all(path).await
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rel(s: &str) -> RelPath {
        RelPath::parse(s).unwrap()
    }

    fn config(direction: Direction) -> SyncConfig {
        SyncConfig {
            direction,
            max_retries: 1,
            retry_base_delay: Duration::from_millis(1),
            ..SyncConfig::default()
        }
    }

    fn engine(
        cfg: SyncConfig,
        store: &Arc<MemoryStore>,
        local: &tempfile::TempDir,
    ) -> SyncEngine {
        SyncEngine::new(
            cfg,
            store.clone() as Arc<dyn RemoteStore>,
            local.path(),
            Arc::new(NoopSink),
        )
        .unwrap()
    }

    fn write_local(dir: &tempfile::TempDir, path: &str, data: &[u8], secs: i64) {
        let full = rel(path).to_fs_path(dir.path());
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, data).unwrap();
        filetime::set_file_mtime(&full, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    #[tokio::test]
    async fn test_push_transfers_tree() {
        let store = Arc::new(MemoryStore::new());
        let local = tempfile::tempdir().unwrap();
        write_local(&local, "docs/a.txt", b"alpha", 1_700_000_000);
        write_local(&local, "b.txt", b"beta", 1_700_000_000);

        let report = engine(config(Direction::Push), &store, &local)
            .run()
            .await
            .unwrap();

        assert_eq!(report.files_transferred, 2);
        assert_eq!(report.dirs_created, 1);
        assert!(report.is_clean());
        assert_eq!(store.file_data(&rel("docs/a.txt")).unwrap(), b"alpha");
        assert_eq!(store.file_data(&rel("b.txt")).unwrap(), b"beta");
    }

    #[tokio::test]
    async fn test_pull_transfers_tree_with_mtime() {
        let store = Arc::new(MemoryStore::new());
        store.insert_file(&rel("docs/a.txt"), b"alpha", ts(1_700_000_000));
        let local = tempfile::tempdir().unwrap();

        let report = engine(config(Direction::Pull), &store, &local)
            .run()
            .await
            .unwrap();

        assert_eq!(report.files_transferred, 1);
        let dest = local.path().join("docs").join("a.txt");
        assert_eq!(std::fs::read(&dest).unwrap(), b"alpha");
        let meta = std::fs::metadata(&dest).unwrap();
        assert_eq!(
            FileTime::from_last_modification_time(&meta).unix_seconds(),
            1_700_000_000
        );
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        store.insert_file(&rel("docs/a.txt"), b"alpha", ts(1_700_000_000));
        store.insert_file(&rel("docs/b.txt"), b"beta", ts(1_700_000_000));
        let local = tempfile::tempdir().unwrap();

        let first = engine(config(Direction::Pull), &store, &local)
            .run()
            .await
            .unwrap();
        assert_eq!(first.files_transferred, 2);

        let second = engine(config(Direction::Pull), &store, &local)
            .run()
            .await
            .unwrap();
        assert_eq!(second.files_transferred, 0);
        assert_eq!(second.files_skipped, 2);
    }

    #[tokio::test]
    async fn test_mirror_delete_removes_local_extras_children_first() {
        let store = Arc::new(MemoryStore::new());
        store.insert_file(&rel("x.txt"), b"x", ts(100));
        let local = tempfile::tempdir().unwrap();
        write_local(&local, "x.txt", b"x", 100);
        write_local(&local, "y.txt", b"y", 100);
        write_local(&local, "old/z.txt", b"z", 100);

        let cfg = SyncConfig {
            mirror_deletes: true,
            ..config(Direction::Pull)
        };
        let report = engine(cfg, &store, &local).run().await.unwrap();

        assert_eq!(report.files_deleted, 3);
        assert!(local.path().join("x.txt").exists());
        assert!(!local.path().join("y.txt").exists());
        assert!(!local.path().join("old").exists());
    }

    #[tokio::test]
    async fn test_mirror_delete_push_prunes_remote() {
        let store = Arc::new(MemoryStore::new());
        store.insert_file(&rel("stale/gone.txt"), b"x", ts(100));
        let local = tempfile::tempdir().unwrap();
        write_local(&local, "fresh.txt", b"f", 100);

        let cfg = SyncConfig {
            mirror_deletes: true,
            ..config(Direction::Push)
        };
        let report = engine(cfg, &store, &local).run().await.unwrap();

        assert_eq!(report.files_deleted, 2);
        assert_eq!(store.paths(), vec!["fresh.txt"]);
    }

    #[tokio::test]
    async fn test_failed_file_is_recorded_and_run_continues() {
        let store = Arc::new(MemoryStore::new());
        store.insert_file(&rel("bad.bin"), &vec![1u8; 500], ts(100));
        store.set_fail_read_after(Some(10));
        let local = tempfile::tempdir().unwrap();

        let report = engine(config(Direction::Pull), &store, &local)
            .run()
            .await
            .unwrap();

        assert_eq!(report.files_transferred, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.first_error().unwrap().contains("bad.bin"));
        assert!(!local.path().join("bad.bin").exists());
    }

    #[tokio::test]
    async fn test_missing_source_root_aborts_run() {
        let store = Arc::new(MemoryStore::new());
        let local = tempfile::tempdir().unwrap();
        let missing = local.path().join("does-not-exist");

        let result = SyncEngine::new(
            config(Direction::Push),
            store.clone() as Arc<dyn RemoteStore>,
            missing,
            Arc::new(NoopSink),
        )
        .unwrap()
        .run()
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_concurrency_stays_within_bound() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..20 {
            store.insert_file(
                &rel(&format!("f{i:02}.bin")),
                &vec![0u8; 256 * 1024],
                ts(100),
            );
        }
        let local = tempfile::tempdir().unwrap();

        let cfg = SyncConfig {
            max_concurrent: 2,
            ..config(Direction::Pull)
        };
        let report = engine(cfg, &store, &local).run().await.unwrap();

        assert_eq!(report.files_transferred, 20);
        assert!(store.peak_in_flight() <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_directory_listings_obey_concurrency_bound() {
        let inner = MemoryStore::new();
        for i in 0..12 {
            inner.insert_dir(&rel(&format!("d{i:02}")), ts(100));
        }
        let store = Arc::new(SlowListStore::new(inner));
        let local = tempfile::tempdir().unwrap();

        let cfg = SyncConfig {
            max_concurrent: 2,
            ..config(Direction::Pull)
        };
        let report = SyncEngine::new(
            cfg,
            store.clone() as Arc<dyn RemoteStore>,
            local.path(),
            Arc::new(NoopSink),
        )
        .unwrap()
        .run()
        .await
        .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.dirs_created, 12);
        assert!(
            store.peak_lists() <= 2,
            "peak concurrent listings {} exceeded the bound",
            store.peak_lists()
        );
    }

    #[tokio::test]
    async fn test_deep_tree_does_not_starve_narrow_concurrency() {
        // depth greater than max_concurrent; completes only because permits
        // are released before each recursion
        let store = Arc::new(MemoryStore::new());
        store.insert_file(&rel("a/b/c/d/e/leaf.txt"), b"deep", ts(100));
        let local = tempfile::tempdir().unwrap();

        let cfg = SyncConfig {
            max_concurrent: 1,
            ..config(Direction::Pull)
        };
        let report = engine(cfg, &store, &local).run().await.unwrap();

        assert_eq!(report.files_transferred, 1);
        assert!(local
            .path()
            .join("a/b/c/d/e/leaf.txt")
            .exists());
    }
}
