//! Tree enumeration for the local and remote sides.
//!
//! The engine's main pass walks one directory at a time; the snapshot
//! functions here walk a whole tree up front and exist for mirror
//! deletion, which needs both trees as they were before the run mutated
//! anything.

use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::fs;

use davsync_common::{Error, RelPath, Result};
use davsync_storage::{Entry, RemoteStore};

/// List the immediate children of one local directory.
pub async fn list_local_dir(root: &Path, dir: &RelPath) -> Result<Vec<Entry>> {
    let fs_dir = dir.to_fs_path(root);
    let mut reader = fs::read_dir(&fs_dir)
        .await
        .map_err(|e| Error::Enumeration(format!("read {}: {e}", fs_dir.display())))?;

    let mut out = Vec::new();
    while let Some(dirent) = reader
        .next_entry()
        .await
        .map_err(|e| Error::Enumeration(format!("read {}: {e}", fs_dir.display())))?
    {
        let name = dirent.file_name();
        let Some(name) = name.to_str() else {
            return Err(Error::Enumeration(format!(
                "non-UTF-8 file name under {}",
                fs_dir.display()
            )));
        };
        let meta = dirent
            .metadata()
            .await
            .map_err(|e| Error::Enumeration(format!("stat {}: {e}", dirent.path().display())))?;
        let modified: DateTime<Utc> = meta
            .modified()
            .map_err(|e| Error::Enumeration(format!("mtime {}: {e}", dirent.path().display())))?
            .into();
        out.push(Entry {
            path: dir.join(name),
            is_directory: meta.is_dir(),
            modified,
            size: if meta.is_dir() { 0 } else { meta.len() },
        });
    }
    Ok(out)
}

/// Every entry below a local root, in unspecified order. The root itself
/// is not included.
pub async fn snapshot_local(root: &Path) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    let mut pending = vec![RelPath::root()];
    while let Some(dir) = pending.pop() {
        for entry in list_local_dir(root, &dir).await? {
            if entry.is_directory {
                pending.push(entry.path.clone());
            }
            out.push(entry);
        }
    }
    Ok(out)
}

/// Every entry below the remote root, in unspecified order. The root
/// itself is not included.
pub async fn snapshot_remote(store: &dyn RemoteStore) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    let mut pending = vec![RelPath::root()];
    while let Some(dir) = pending.pop() {
        for entry in store.list(&dir).await? {
            if entry.is_directory {
                pending.push(entry.path.clone());
            }
            out.push(entry);
        }
    }
    Ok(out)
}
