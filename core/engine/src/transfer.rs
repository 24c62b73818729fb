//! Single-attempt file transfers between the local tree and a remote store.
//!
//! A download never exposes a partially written destination: bytes land in
//! a temporary sibling which is renamed over the destination only after the
//! stream completed. Retrying is the caller's concern; each function here
//! is one attempt.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use filetime::FileTime;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use davsync_common::{Error, Result};
use davsync_storage::{ByteStream, Entry, RemoteStore};

use crate::progress::{ProgressReporter, ProgressSink};

/// Suffix of in-flight download files, sibling to the destination so the
/// final rename stays on one filesystem.
const TMP_SUFFIX: &str = ".davsync-tmp";

/// Upload read granularity.
const UPLOAD_CHUNK: usize = 64 * 1024;

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TMP_SUFFIX);
    dest.with_file_name(name)
}

/// Download one remote file into the local tree.
///
/// Streams into `<dest>.davsync-tmp`, sets the remote modification time on
/// the temporary file, then renames it over the destination. On any failure
/// the temporary file is removed and the previous destination content, if
/// any, is left untouched.
pub async fn download(
    store: &dyn RemoteStore,
    local_root: &Path,
    entry: &Entry,
    sink: Arc<dyn ProgressSink>,
) -> Result<()> {
    let dest = entry.path.to_fs_path(local_root);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut stream = store.read_stream(&entry.path).await?;
    let tmp = temp_path(&dest);
    let mut reporter = ProgressReporter::new(sink, entry.path.clone(), entry.size);

    let written = async {
        let mut file = fs::File::create(&tmp).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            reporter.advance(chunk.len() as u64);
        }
        file.flush().await?;
        Ok::<_, Error>(())
    }
    .await;

    if let Err(err) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(err);
    }

    let mtime = FileTime::from_unix_time(
        entry.modified.timestamp(),
        entry.modified.timestamp_subsec_nanos(),
    );
    if let Err(err) = filetime::set_file_mtime(&tmp, mtime) {
        let _ = fs::remove_file(&tmp).await;
        return Err(Error::LocalIo(err));
    }
    if let Err(err) = fs::rename(&tmp, &dest).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(Error::LocalIo(err));
    }

    debug!("downloaded {} ({} bytes)", entry.path, entry.size);
    reporter.complete();
    Ok(())
}

/// Upload one local file to the remote store.
///
/// Remote parent directories are created first; the file is streamed in
/// fixed-size chunks and the local modification time travels with the
/// write so a later comparison sees the original timestamp.
pub async fn upload(
    store: &dyn RemoteStore,
    local_root: &Path,
    entry: &Entry,
    sink: Arc<dyn ProgressSink>,
) -> Result<()> {
    if let Some(parent) = entry.path.parent() {
        if !parent.is_root() {
            store.make_dir(&parent).await?;
        }
    }

    let src = entry.path.to_fs_path(local_root);
    let file = fs::File::open(&src).await?;
    let reporter = Arc::new(Mutex::new(ProgressReporter::new(
        sink,
        entry.path.clone(),
        entry.size,
    )));

    let counting = reporter.clone();
    let body: ByteStream = Box::pin(
        ReaderStream::with_capacity(file, UPLOAD_CHUNK).map(move |chunk| match chunk {
            Ok(bytes) => {
                counting.lock().unwrap().advance(bytes.len() as u64);
                Ok(bytes)
            }
            Err(err) => Err(Error::LocalIo(err)),
        }),
    );

    store
        .write_stream(&entry.path, body, entry.size, entry.modified)
        .await?;

    debug!("uploaded {} ({} bytes)", entry.path, entry.size);
    reporter.lock().unwrap().complete();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopSink;
    use chrono::{DateTime, TimeZone, Utc};
    use davsync_common::RelPath;
    use davsync_storage::MemoryStore;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rel(s: &str) -> RelPath {
        RelPath::parse(s).unwrap()
    }

    fn file_entry(path: &str, modified: DateTime<Utc>, size: u64) -> Entry {
        Entry {
            path: rel(path),
            is_directory: false,
            modified,
            size,
        }
    }

    fn sink() -> Arc<dyn ProgressSink> {
        Arc::new(NoopSink)
    }

    #[tokio::test]
    async fn test_download_writes_content_and_mtime() {
        let store = MemoryStore::new();
        store.insert_file(&rel("docs/a.txt"), b"hello", ts(1_700_000_000));
        let local = tempfile::tempdir().unwrap();

        let entry = file_entry("docs/a.txt", ts(1_700_000_000), 5);
        download(&store, local.path(), &entry, sink()).await.unwrap();

        let dest = local.path().join("docs").join("a.txt");
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");

        let meta = std::fs::metadata(&dest).unwrap();
        let mtime = FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_old_content_and_no_temp() {
        let store = MemoryStore::new();
        store.insert_file(&rel("a.txt"), &vec![9u8; 500], ts(200));
        store.set_fail_read_after(Some(100));

        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.txt"), b"previous").unwrap();

        let entry = file_entry("a.txt", ts(200), 500);
        let err = download(&store, local.path(), &entry, sink())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        assert_eq!(std::fs::read(local.path().join("a.txt")).unwrap(), b"previous");
        let leftovers: Vec<_> = std::fs::read_dir(local.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| n.ends_with(TMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_upload_creates_parents_and_keeps_modified() {
        let store = MemoryStore::new();
        let local = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(local.path().join("docs")).unwrap();
        std::fs::write(local.path().join("docs").join("a.txt"), b"payload").unwrap();

        let entry = file_entry("docs/a.txt", ts(1234), 7);
        upload(&store, local.path(), &entry, sink()).await.unwrap();

        assert_eq!(store.file_data(&rel("docs/a.txt")).unwrap(), b"payload");
        let stat = store.stat(&rel("docs/a.txt")).await.unwrap();
        assert_eq!(stat.modified, ts(1234));
    }

    #[tokio::test]
    async fn test_upload_missing_local_file_errors() {
        let store = MemoryStore::new();
        let local = tempfile::tempdir().unwrap();

        let entry = file_entry("nope.txt", ts(1), 1);
        let err = upload(&store, local.path(), &entry, sink()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
