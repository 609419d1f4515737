//! REST backup-repository server.
//!
//! Translates the REST object protocol spoken by backup clients into calls on
//! a generic [`reposerve_store::Storage`] backend. Request paths are resolved
//! to storage keys by [`resolve::PathResolver`], which runs as middleware so
//! each handler receives the already-resolved key; the handlers then enforce
//! the per-class rules (write-once objects, mutable locks, listings).
//!
//! The server is stateless: everything lives in the backend.

pub mod config;
pub mod error;
pub mod handler;
pub mod resolve;
pub mod router;
pub mod server;
pub mod state;

pub use config::{ServerConfig, StorageConfig};
pub use error::{ServerError, ServerResult};
pub use handler::{ListEntry, LIST_V1, LIST_V2};
pub use resolve::{PathResolver, ResolvedPath, Target};
pub use server::RepoServer;
pub use state::RepoState;
