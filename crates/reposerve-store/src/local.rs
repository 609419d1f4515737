//! Local filesystem storage backend.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::traits::{clamp_range, ByteStream, ObjectEntry, Storage, StreamingUpload, WriteMode};

/// Prefix of in-flight temporary files; hidden from listings.
const TEMP_PREFIX: &str = ".reposerve-tmp";

/// Storage rooted at a local directory.
///
/// Keys map to relative paths below the root. Uploads stream into a
/// temporary file next to the target and are moved into place, so readers
/// never see a partially written object. Create-only uploads link the
/// temporary file to the target, which fails atomically if the target
/// already exists.
#[derive(Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key onto a path below the root.
    ///
    /// Every component must be a plain name, so no key can address anything
    /// outside the root.
    fn key_path(&self, key: &str) -> StoreResult<PathBuf> {
        let key = key.trim_end_matches('/');
        if key.is_empty() {
            return Ok(self.root.clone());
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        for component in Path::new(key).components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
        }
        Ok(self.root.join(key))
    }

    /// Open an object file for reading, with its size.
    async fn open(&self, key: &str) -> StoreResult<(fs::File, u64)> {
        let path = self.key_path(key)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok((file, meta.len()))
    }
}

fn not_found_or_io(key: &str, err: std::io::Error) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io(err)
    }
}

fn join_error(err: tokio::task::JoinError) -> StoreError {
    StoreError::Backend(format!("blocking task failed: {err}"))
}

fn key_of(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

/// Collect the files below `base`, descending at most `max_depth` levels.
fn walk(root: &Path, base: &Path, max_depth: Option<usize>) -> StoreResult<Vec<ObjectEntry>> {
    if !base.is_dir() {
        return Ok(Vec::new());
    }
    let mut walker = WalkDir::new(base).sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        let Some(key) = key_of(root, entry.path()) else {
            tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 path");
            continue;
        };
        let size = entry.metadata().map_err(std::io::Error::from)?.len();
        entries.push(ObjectEntry::new(key, size));
    }
    Ok(entries)
}

/// An upload streaming into a temporary file beside its target.
///
/// The temporary file is removed if the upload is dropped unfinished.
struct LocalUpload {
    key: String,
    file: fs::File,
    temp: TempPath,
    target: PathBuf,
    mode: WriteMode,
    written: u64,
}

#[async_trait]
impl StreamingUpload for LocalUpload {
    async fn write(&mut self, data: Bytes) -> StoreResult<()> {
        self.file.write_all(&data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StoreResult<u64> {
        let LocalUpload {
            key,
            mut file,
            temp,
            target,
            mode,
            written,
        } = *self;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let created = tokio::task::spawn_blocking(move || match mode {
            WriteMode::Replace => temp.persist(&target).map(|_| true),
            WriteMode::CreateNew => match temp.persist_noclobber(&target) {
                Ok(()) => Ok(true),
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e),
            },
        })
        .await
        .map_err(join_error)?
        .map_err(|e| StoreError::Io(e.error))?;

        if !created {
            return Err(StoreError::AlreadyExists(key));
        }
        debug!(key, size = written, "upload committed");
        Ok(written)
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        let LocalUpload { file, temp, .. } = *self;
        drop(file);
        temp.close()?;
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.key_path(key)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn get_stream(&self, key: &str) -> StoreResult<ByteStream> {
        let (file, _) = self.open(key).await?;
        Ok(Box::pin(ReaderStream::new(file).map_err(StoreError::from)))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn get_range(&self, key: &str, start: u64, end: u64) -> StoreResult<Bytes> {
        let (mut file, size) = self.open(key).await?;
        let (start, end) = clamp_range(start, end, size)?;
        let len = usize::try_from(end - start)
            .map_err(|_| StoreError::InvalidRange(format!("{start}..{end} does not fit in memory")))?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn stat(&self, key: &str) -> StoreResult<u64> {
        let path = self.key_path(key)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        if !meta.is_file() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(meta.len())
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn put_stream<'a>(
        &'a self,
        key: &str,
        mode: WriteMode,
    ) -> StoreResult<Box<dyn StreamingUpload + 'a>> {
        if key.trim_matches('/').is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let target = self.key_path(key)?;
        let parent = target
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?
            .to_path_buf();
        let tmp = tokio::task::spawn_blocking(move || -> StoreResult<tempfile::NamedTempFile> {
            std::fs::create_dir_all(&parent)?;
            Ok(tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(&parent)?)
        })
        .await
        .map_err(join_error)??;
        let (file, temp) = tmp.into_parts();
        Ok(Box::new(LocalUpload {
            key: key.to_string(),
            file: fs::File::from_std(file),
            temp,
            target,
            mode,
            written: 0,
        }))
    }

    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        let mut upload = self.put_stream(key, WriteMode::Replace).await?;
        upload.write(data).await?;
        upload.finish().await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, data: Bytes) -> StoreResult<bool> {
        let mut upload = self.put_stream(key, WriteMode::CreateNew).await?;
        upload.write(data).await?;
        match upload.finish().await {
            Ok(_) => Ok(true),
            Err(StoreError::AlreadyExists(_)) => {
                debug!(key, "object already present, not replaced");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn atomic_create(&self) -> bool {
        true
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.key_path(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
        let base = self.key_path(prefix)?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk(&root, &base, None))
            .await
            .map_err(join_error)?
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list_shallow(&self, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
        let base = self.key_path(prefix)?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk(&root, &base, Some(1)))
            .await
            .map_err(join_error)?
    }

    async fn create_dir(&self, prefix: &str) -> StoreResult<()> {
        let path = self.key_path(prefix)?;
        fs::create_dir_all(&path).await?;
        Ok(())
    }
}
