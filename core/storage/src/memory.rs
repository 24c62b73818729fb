//! In-memory remote store for testing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::store::{ByteStream, Entry, RemoteStore};
use davsync_common::{Error, RelPath, Result};

const CHUNK_SIZE: usize = 64 * 1024;

/// In-memory node.
#[derive(Debug, Clone)]
enum Node {
    File {
        data: Vec<u8>,
        modified: DateTime<Utc>,
    },
    Directory {
        modified: DateTime<Utc>,
    },
}

/// Tracks how many store operations are in flight at once.
///
/// Used by engine tests to verify the concurrency bound: `peak` holds the
/// highest number of simultaneously active operations observed.
#[derive(Debug, Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

struct GaugeGuard {
    gauge: Arc<Gauge>,
}

impl GaugeGuard {
    fn enter(gauge: &Arc<Gauge>) -> Self {
        let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(now, Ordering::SeqCst);
        Self {
            gauge: gauge.clone(),
        }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory remote store.
///
/// Useful for tests and development. All data is stored in memory and lost
/// on drop. The root directory always exists and is never stored as a node.
pub struct MemoryStore {
    nodes: Arc<RwLock<HashMap<String, Node>>>,
    gauge: Arc<Gauge>,
    /// When set, read streams fail with a transport error after yielding
    /// this many bytes. Lets tests interrupt a download mid-stream.
    fail_read_after: RwLock<Option<usize>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            gauge: Arc::new(Gauge::default()),
            fail_read_after: RwLock::new(None),
        }
    }

    /// Insert a file directly, creating parent directories as needed.
    pub fn insert_file(&self, path: &RelPath, data: &[u8], modified: DateTime<Utc>) {
        let mut nodes = self.nodes.write().unwrap();
        Self::ensure_parents(&mut nodes, path, modified);
        nodes.insert(
            path.as_str().to_string(),
            Node::File {
                data: data.to_vec(),
                modified,
            },
        );
    }

    /// Insert a directory directly, creating parents as needed.
    pub fn insert_dir(&self, path: &RelPath, modified: DateTime<Utc>) {
        let mut nodes = self.nodes.write().unwrap();
        Self::ensure_parents(&mut nodes, path, modified);
        nodes.insert(path.as_str().to_string(), Node::Directory { modified });
    }

    /// Read a file's content directly.
    pub fn file_data(&self, path: &RelPath) -> Option<Vec<u8>> {
        match self.nodes.read().unwrap().get(path.as_str()) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut out: Vec<String> = self.nodes.read().unwrap().keys().cloned().collect();
        out.sort();
        out
    }

    /// Make read streams fail after yielding `bytes` bytes.
    pub fn set_fail_read_after(&self, bytes: Option<usize>) {
        *self.fail_read_after.write().unwrap() = bytes;
    }

    /// Highest number of simultaneously in-flight operations observed.
    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    fn ensure_parents(nodes: &mut HashMap<String, Node>, path: &RelPath, modified: DateTime<Utc>) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if p.is_root() {
                break;
            }
            nodes
                .entry(p.as_str().to_string())
                .or_insert(Node::Directory { modified });
            parent = p.parent();
        }
    }

    fn is_child_of(candidate: &str, dir: &RelPath) -> bool {
        let rest = if dir.is_root() {
            candidate
        } else {
            match candidate.strip_prefix(dir.as_str()) {
                Some(rest) => match rest.strip_prefix('/') {
                    Some(rest) => rest,
                    None => return false,
                },
                None => return false,
            }
        };
        !rest.is_empty() && !rest.contains('/')
    }

    fn entry_for(path: &RelPath, node: &Node) -> Entry {
        match node {
            Node::File { data, modified } => Entry {
                path: path.clone(),
                is_directory: false,
                modified: *modified,
                size: data.len() as u64,
            },
            Node::Directory { modified } => Entry {
                path: path.clone(),
                is_directory: true,
                modified: *modified,
                size: 0,
            },
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, path: &RelPath) -> Result<Vec<Entry>> {
        let _op = GaugeGuard::enter(&self.gauge);
        let nodes = self.nodes.read().unwrap();

        if !path.is_root() {
            match nodes.get(path.as_str()) {
                Some(Node::Directory { .. }) => {}
                Some(Node::File { .. }) => {
                    return Err(Error::Transport(format!("not a directory: {path}")));
                }
                None => return Err(Error::NotFound(format!("directory not found: {path}"))),
            }
        }

        let mut out = Vec::new();
        for (key, node) in nodes.iter() {
            if Self::is_child_of(key, path) {
                let child = RelPath::parse(key)?;
                out.push(Self::entry_for(&child, node));
            }
        }
        Ok(out)
    }

    async fn stat(&self, path: &RelPath) -> Result<Entry> {
        let _op = GaugeGuard::enter(&self.gauge);
        if path.is_root() {
            return Ok(Entry {
                path: RelPath::root(),
                is_directory: true,
                modified: Utc::now(),
                size: 0,
            });
        }
        let nodes = self.nodes.read().unwrap();
        let node = nodes
            .get(path.as_str())
            .ok_or_else(|| Error::NotFound(format!("path not found: {path}")))?;
        Ok(Self::entry_for(path, node))
    }

    async fn read_stream(&self, path: &RelPath) -> Result<ByteStream> {
        let data = self
            .file_data(path)
            .ok_or_else(|| Error::NotFound(format!("file not found: {path}")))?;
        let fail_after = *self.fail_read_after.read().unwrap();
        let op = GaugeGuard::enter(&self.gauge);

        let stream = futures::stream::unfold(
            (data, 0usize, op),
            move |(data, offset, op)| async move {
                if offset >= data.len() {
                    return None;
                }
                if let Some(limit) = fail_after {
                    if offset >= limit {
                        return Some((
                            Err(Error::Transport("injected read failure".to_string())),
                            (data, usize::MAX, op),
                        ));
                    }
                }
                let mut end = (offset + CHUNK_SIZE).min(data.len());
                if let Some(limit) = fail_after {
                    end = end.min(limit.max(offset + 1));
                }
                let chunk = Bytes::copy_from_slice(&data[offset..end]);
                Some((Ok(chunk), (data, end, op)))
            },
        );
        Ok(Box::pin(stream))
    }

    async fn write_stream(
        &self,
        path: &RelPath,
        mut data: ByteStream,
        _size: u64,
        modified: DateTime<Utc>,
    ) -> Result<()> {
        let _op = GaugeGuard::enter(&self.gauge);

        if let Some(parent) = path.parent() {
            if !parent.is_root() {
                let nodes = self.nodes.read().unwrap();
                match nodes.get(parent.as_str()) {
                    Some(Node::Directory { .. }) => {}
                    Some(Node::File { .. }) => {
                        return Err(Error::Transport(format!("parent is a file: {parent}")));
                    }
                    None => {
                        return Err(Error::NotFound(format!(
                            "parent directory not found: {parent}"
                        )));
                    }
                }
            }
        }

        let mut buf = Vec::new();
        while let Some(chunk) = data.next().await {
            buf.extend_from_slice(&chunk?);
        }

        self.nodes.write().unwrap().insert(
            path.as_str().to_string(),
            Node::File {
                data: buf,
                modified,
            },
        );
        Ok(())
    }

    async fn make_dir(&self, path: &RelPath) -> Result<()> {
        let _op = GaugeGuard::enter(&self.gauge);
        if path.is_root() {
            return Ok(());
        }
        let mut nodes = self.nodes.write().unwrap();
        let mut current = RelPath::root();
        for comp in path.as_str().split('/') {
            current = current.join(comp);
            match nodes.get(current.as_str()) {
                Some(Node::Directory { .. }) => {}
                Some(Node::File { .. }) => {
                    return Err(Error::Transport(format!(
                        "cannot create directory over file: {current}"
                    )));
                }
                None => {
                    nodes.insert(
                        current.as_str().to_string(),
                        Node::Directory {
                            modified: Utc::now(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, path: &RelPath) -> Result<()> {
        let _op = GaugeGuard::enter(&self.gauge);
        let mut nodes = self.nodes.write().unwrap();
        if let Some(Node::Directory { .. }) = nodes.get(path.as_str()) {
            let has_children = nodes.keys().any(|k| Self::is_child_of(k, path));
            if has_children {
                return Err(Error::Transport(format!("directory not empty: {path}")));
            }
        }
        nodes.remove(path.as_str());
        Ok(())
    }

    async fn remove_all(&self, path: &RelPath) -> Result<()> {
        let _op = GaugeGuard::enter(&self.gauge);
        let mut nodes = self.nodes.write().unwrap();
        let prefix = format!("{}/", path.as_str());
        nodes.retain(|k, _| k != path.as_str() && !k.starts_with(&prefix));
        Ok(())
    }
}
