//! Mirror deletion of destination extras.
//!
//! After a mirror run the destination must not keep entries the source no
//! longer has. Both trees are snapshotted before the main pass, the
//! difference is ordered children-first, and each extra is removed
//! individually. Deletion is best effort: a failed removal is logged and
//! skipped, it neither aborts the pass nor fails the run.

use std::collections::HashSet;
use std::path::Path;

use tokio::fs;
use tracing::{info, warn};

use davsync_storage::{Entry, RemoteStore};

/// Destination entries absent from the source, deepest paths first.
///
/// Ordering by path length descending guarantees a directory's contents
/// are removed before the directory itself, so each removal only ever
/// targets a file or an already empty directory. The tree root is never a
/// candidate.
pub fn deletion_set(source: &[Entry], dest: &[Entry]) -> Vec<Entry> {
    let keep: HashSet<&str> = source.iter().map(|e| e.path.as_str()).collect();
    let mut extras: Vec<Entry> = dest
        .iter()
        .filter(|e| !e.path.is_root() && !keep.contains(e.path.as_str()))
        .cloned()
        .collect();
    extras.sort_by(|a, b| {
        b.path
            .as_str()
            .len()
            .cmp(&a.path.as_str().len())
            .then_with(|| b.path.cmp(&a.path))
    });
    extras
}

/// Remove extras from the local tree. Returns the number removed.
pub async fn delete_local_extras(root: &Path, extras: &[Entry]) -> u64 {
    let mut deleted = 0;
    for entry in extras {
        let target = entry.path.to_fs_path(root);
        let result = if entry.is_directory {
            fs::remove_dir(&target).await
        } else {
            fs::remove_file(&target).await
        };
        match result {
            Ok(()) => {
                info!("deleted local {}", entry.path);
                deleted += 1;
            }
            Err(err) => warn!("failed to delete local {}: {err}", entry.path),
        }
    }
    deleted
}

/// Remove extras from the remote store. Returns the number removed.
pub async fn delete_remote_extras(store: &dyn RemoteStore, extras: &[Entry]) -> u64 {
    let mut deleted = 0;
    for entry in extras {
        match store.remove(&entry.path).await {
            Ok(()) => {
                info!("deleted remote {}", entry.path);
                deleted += 1;
            }
            Err(err) => warn!("failed to delete remote {}: {err}", entry.path),
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use davsync_common::RelPath;
    use davsync_storage::MemoryStore;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rel(s: &str) -> RelPath {
        RelPath::parse(s).unwrap()
    }

    fn entry(path: &str, is_directory: bool) -> Entry {
        Entry {
            path: rel(path),
            is_directory,
            modified: ts(1),
            size: 0,
        }
    }

    #[test]
    fn test_deletion_set_orders_children_before_parents() {
        let source = vec![entry("keep.txt", false)];
        let dest = vec![
            entry("keep.txt", false),
            entry("a", true),
            entry("a/b", true),
            entry("a/b/c.txt", false),
        ];

        let extras: Vec<String> = deletion_set(&source, &dest)
            .into_iter()
            .map(|e| e.path.as_str().to_string())
            .collect();
        assert_eq!(extras, vec!["a/b/c.txt", "a/b", "a"]);
    }

    #[test]
    fn test_deletion_set_empty_when_dest_matches() {
        let tree = vec![entry("a", true), entry("a/b.txt", false)];
        assert!(deletion_set(&tree, &tree).is_empty());
    }

    #[tokio::test]
    async fn test_delete_local_extras_depth_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("old").join("deep")).unwrap();
        std::fs::write(dir.path().join("old").join("deep").join("f.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"k").unwrap();

        let extras = deletion_set(
            &[entry("keep.txt", false)],
            &[
                entry("keep.txt", false),
                entry("old", true),
                entry("old/deep", true),
                entry("old/deep/f.txt", false),
            ],
        );
        let deleted = delete_local_extras(dir.path(), &extras).await;

        assert_eq!(deleted, 3);
        assert!(!dir.path().join("old").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_delete_remote_extras_best_effort() {
        let store = MemoryStore::new();
        store.insert_file(&rel("old/f.txt"), b"x", ts(1));
        store.insert_file(&rel("keep.txt"), b"k", ts(1));

        // "ghost" does not exist; removal of a missing path still succeeds,
        // so only actual content counts are asserted
        let extras = vec![
            entry("old/f.txt", false),
            entry("old", true),
            entry("ghost", true),
        ];
        let deleted = delete_remote_extras(&store, &extras).await;

        assert_eq!(deleted, 3);
        assert_eq!(store.paths(), vec!["keep.txt"]);
    }
}
