//! WebDAV remote store built on opendal.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use opendal::{Metakey, Operator};
use tracing::debug;

use crate::store::{ByteStream, Entry, RemoteStore};
use davsync_common::{Error, RelPath, Result};

/// Chunk size for ranged streaming reads.
const READ_CHUNK: u64 = 256 * 1024;

/// WebDAV remote store.
pub struct WebdavStore {
    operator: Operator,
}

impl WebdavStore {
    /// Connect to a WebDAV endpoint.
    ///
    /// `root` is an optional path prefix on the server; all store paths are
    /// relative to it.
    pub fn new(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<&str>,
    ) -> Result<Self> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);
        if let Some(root) = root {
            builder = builder.root(root);
        }

        let operator = Operator::new(builder).map_err(map_err)?.finish();
        debug!("webdav store connected: {}", endpoint.trim_end_matches('/'));
        Ok(Self { operator })
    }

    /// opendal key for a file path.
    fn file_key(path: &RelPath) -> String {
        path.as_str().to_string()
    }

    /// opendal key for a directory path (trailing slash, "/" for the root).
    fn dir_key(path: &RelPath) -> String {
        if path.is_root() {
            "/".to_string()
        } else {
            format!("{}/", path.as_str())
        }
    }

    fn entry_from_meta(path: RelPath, meta: &opendal::Metadata) -> Entry {
        Entry {
            path,
            is_directory: meta.is_dir(),
            modified: meta.last_modified().unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            size: meta.content_length(),
        }
    }

    /// Stat trying the file key first, then the directory key. WebDAV
    /// servers distinguish `a/b` from `a/b/`; callers do not.
    async fn stat_any(&self, path: &RelPath) -> Result<opendal::Metadata> {
        if path.is_root() {
            return self.operator.stat("/").await.map_err(map_err);
        }
        match self.operator.stat(&Self::file_key(path)).await {
            Ok(meta) => Ok(meta),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                self.operator.stat(&Self::dir_key(path)).await.map_err(map_err)
            }
            Err(e) => Err(map_err(e)),
        }
    }
}

#[async_trait]
impl RemoteStore for WebdavStore {
    fn name(&self) -> &str {
        "webdav"
    }

    async fn list(&self, path: &RelPath) -> Result<Vec<Entry>> {
        use futures::TryStreamExt;

        let key = if path.is_root() {
            String::new()
        } else {
            Self::dir_key(path)
        };

        let mut lister = self
            .operator
            .lister_with(&key)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await
            .map_err(map_err)?;

        let mut out = Vec::new();
        while let Some(item) = lister.try_next().await.map_err(map_err)? {
            let raw = item.path().to_string();
            let trimmed = raw.trim_matches('/');
            // Servers include the listed collection itself; skip it.
            if trimmed.is_empty() || trimmed == path.as_str() {
                continue;
            }
            let child = RelPath::parse(trimmed)?;
            out.push(Self::entry_from_meta(child, item.metadata()));
        }
        Ok(out)
    }

    async fn stat(&self, path: &RelPath) -> Result<Entry> {
        let meta = self.stat_any(path).await?;
        Ok(Self::entry_from_meta(path.clone(), &meta))
    }

    async fn read_stream(&self, path: &RelPath) -> Result<ByteStream> {
        let meta = self.stat_any(path).await?;
        let total = meta.content_length();
        let operator = self.operator.clone();
        let key = Self::file_key(path);

        // WebDAV GET is not seekable through every server; ranged reads of a
        // fixed chunk size keep memory bounded either way.
        let stream = futures::stream::unfold(0u64, move |offset| {
            let operator = operator.clone();
            let key = key.clone();
            async move {
                if offset >= total {
                    return None;
                }
                let end = (offset + READ_CHUNK).min(total);
                let result = operator
                    .read_with(&key)
                    .range(offset..end)
                    .await
                    .map(|buf| Bytes::from(buf.to_vec()))
                    .map_err(map_err);
                match result {
                    Ok(chunk) => Some((Ok(chunk), end)),
                    Err(e) => Some((Err(e), total)),
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn write_stream(
        &self,
        path: &RelPath,
        mut data: ByteStream,
        _size: u64,
        _modified: DateTime<Utc>,
    ) -> Result<()> {
        use futures::StreamExt;

        // The server assigns its own modification time; WebDAV has no
        // portable way to set one.
        let key = Self::file_key(path);
        let mut writer = self.operator.writer(&key).await.map_err(map_err)?;

        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            writer.write(chunk).await.map_err(map_err)?;
        }
        writer.close().await.map_err(map_err)?;
        Ok(())
    }

    async fn make_dir(&self, path: &RelPath) -> Result<()> {
        if path.is_root() {
            return Ok(());
        }
        // MKCOL fails when intermediate collections are missing; create
        // every prefix in order.
        let mut current = RelPath::root();
        for comp in path.as_str().split('/') {
            current = current.join(comp);
            match self.operator.create_dir(&Self::dir_key(&current)).await {
                Ok(()) => {}
                Err(e) if e.kind() == opendal::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(map_err(e)),
            }
        }
        Ok(())
    }

    async fn remove(&self, path: &RelPath) -> Result<()> {
        let meta = match self.stat_any(path).await {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let key = if meta.is_dir() {
            Self::dir_key(path)
        } else {
            Self::file_key(path)
        };
        match self.operator.delete(&key).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn remove_all(&self, path: &RelPath) -> Result<()> {
        let meta = match self.stat_any(path).await {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if meta.is_dir() {
            self.operator
                .remove_all(&Self::dir_key(path))
                .await
                .map_err(map_err)
        } else {
            self.remove(path).await
        }
    }
}

fn map_err(e: opendal::Error) -> Error {
    if e.kind() == opendal::ErrorKind::NotFound {
        Error::NotFound(e.to_string())
    } else {
        Error::Transport(e.to_string())
    }
}
