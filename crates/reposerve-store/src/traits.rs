use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::Stream;

use crate::error::{StoreError, StoreResult};

/// A boxed stream of object content, read chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = StoreResult<Bytes>> + Send>>;

/// One object found by [`Storage::list`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Full storage key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
}

impl ObjectEntry {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// How a streaming upload treats an object already stored at its key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the existing object.
    Replace,
    /// Leave the existing object alone and fail with
    /// [`StoreError::AlreadyExists`].
    CreateNew,
}

/// An upload in progress, fed one chunk at a time.
///
/// Nothing is visible at the key until [`StreamingUpload::finish`] succeeds.
/// Dropping an unfinished upload discards it.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Append a chunk.
    async fn write(&mut self, data: Bytes) -> StoreResult<()>;

    /// Commit the object and return its size.
    async fn finish(self: Box<Self>) -> StoreResult<u64>;

    /// Discard everything written so far.
    async fn abort(self: Box<Self>) -> StoreResult<()>;
}

/// Clamp the half-open range `start..end` to an object of `size` bytes.
pub fn clamp_range(start: u64, end: u64, size: u64) -> StoreResult<(u64, u64)> {
    if end <= start || start >= size {
        return Err(StoreError::InvalidRange(format!(
            "{start}..{end} of a {size} byte object"
        )));
    }
    Ok((start, end.min(size)))
}

/// Byte-level access to a remote or local object store.
///
/// All implementations must satisfy these invariants:
/// - A missing key surfaces as [`StoreError::NotFound`] from `get`, `stat`
///   and `delete`.
/// - `put` replaces any existing object at the key.
/// - `list(prefix)` returns every object whose key lies below `prefix/`
///   (or every object for an empty prefix), at any depth.
/// - Calls are independent; the trait implies no locking across keys.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Short backend identifier used in logs.
    fn name(&self) -> &'static str;

    /// Read an object's full content.
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Size of an object in bytes, without fetching its content.
    async fn stat(&self, key: &str) -> StoreResult<u64>;

    /// Write an object, replacing any previous content.
    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()>;

    /// Remove an object.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// List objects below a prefix.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectEntry>>;

    /// Read an object as a stream of chunks.
    ///
    /// The default reads the whole object first.
    async fn get_stream(&self, key: &str) -> StoreResult<ByteStream> {
        let data = self.get(key).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    /// Read the half-open byte range `start..end` of an object.
    ///
    /// `end` is clamped to the object size; a range starting at or past the
    /// end of the object is [`StoreError::InvalidRange`].
    async fn get_range(&self, key: &str, start: u64, end: u64) -> StoreResult<Bytes> {
        let data = self.get(key).await?;
        let (start, end) = clamp_range(start, end, data.len() as u64)?;
        Ok(data.slice(start as usize..end as usize))
    }

    /// Start a streaming upload to `key`.
    ///
    /// The default buffers the chunks and commits them with `put` or
    /// `put_if_absent`.
    async fn put_stream<'a>(
        &'a self,
        key: &str,
        mode: WriteMode,
    ) -> StoreResult<Box<dyn StreamingUpload + 'a>> {
        Ok(Box::new(BufferedUpload {
            storage: self,
            key: key.to_string(),
            mode,
            buf: BytesMut::new(),
        }))
    }

    /// List only the objects directly below a prefix.
    async fn list_shallow(&self, prefix: &str) -> StoreResult<Vec<ObjectEntry>> {
        let prefix = prefix.trim_end_matches('/');
        let skip = if prefix.is_empty() { 0 } else { prefix.len() + 1 };
        Ok(self
            .list(prefix)
            .await?
            .into_iter()
            .filter(|entry| entry.key.get(skip..).is_some_and(|rest| !rest.contains('/')))
            .collect())
    }

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self.stat(key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write an object only if nothing exists at the key yet.
    ///
    /// Returns `false` without writing when the key is already present. The
    /// default implementation checks then writes, so two racing callers may
    /// both succeed; backends that can create atomically override this and
    /// report it through [`Storage::atomic_create`].
    async fn put_if_absent(&self, key: &str, data: Bytes) -> StoreResult<bool> {
        if self.exists(key).await? {
            return Ok(false);
        }
        self.put(key, data).await?;
        Ok(true)
    }

    /// Whether create-only writes are a true atomic create-if-absent.
    fn atomic_create(&self) -> bool {
        false
    }

    /// Prepare an (initially empty) directory-like prefix.
    ///
    /// Backends without directories have nothing to do.
    async fn create_dir(&self, _prefix: &str) -> StoreResult<()> {
        Ok(())
    }
}

/// Upload that collects chunks in memory until it is finished.
struct BufferedUpload<'a, S: ?Sized> {
    storage: &'a S,
    key: String,
    mode: WriteMode,
    buf: BytesMut,
}

#[async_trait]
impl<'a, S: Storage + ?Sized> StreamingUpload for BufferedUpload<'a, S> {
    async fn write(&mut self, data: Bytes) -> StoreResult<()> {
        self.buf.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StoreResult<u64> {
        let BufferedUpload {
            storage,
            key,
            mode,
            buf,
        } = *self;
        let size = buf.len() as u64;
        match mode {
            WriteMode::Replace => storage.put(&key, buf.freeze()).await?,
            WriteMode::CreateNew => {
                if !storage.put_if_absent(&key, buf.freeze()).await? {
                    return Err(StoreError::AlreadyExists(key));
                }
            }
        }
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
