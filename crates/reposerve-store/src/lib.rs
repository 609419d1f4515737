//! Storage adapters for reposerve.
//!
//! The server never touches bytes at rest itself: every read, write, listing
//! and removal goes through the [`Storage`] trait, keyed by slash-separated
//! storage keys such as `data/21/2159dd48...` or `potato/config`.
//!
//! # Backends
//!
//! - [`InMemoryStorage`] -- `BTreeMap`-based store for tests and embedding
//! - [`LocalStorage`] -- a directory tree on the local filesystem
//!
//! # Design Rules
//!
//! 1. Keys are opaque to the backend beyond their `/` separators.
//! 2. A missing key is always reported as [`StoreError::NotFound`], never as
//!    a generic I/O failure.
//! 3. Listing is recursive below a prefix and returns full keys;
//!    [`Storage::list_shallow`] stops at the first level.
//! 4. Backends hold no state beyond what they persist; no caching.
//! 5. Create-only writes are only as strict as the backend can make them;
//!    see [`Storage::atomic_create`].
//! 6. Object content can be streamed in both directions
//!    ([`Storage::get_stream`], [`Storage::put_stream`]) and read by byte
//!    range ([`Storage::get_range`]).

pub mod error;
pub mod local;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use local::LocalStorage;
pub use memory::InMemoryStorage;
pub use traits::{clamp_range, ByteStream, ObjectEntry, Storage, StreamingUpload, WriteMode};
