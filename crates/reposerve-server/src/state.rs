use std::sync::Arc;

use reposerve_store::Storage;

use crate::config::ServerConfig;
use crate::resolve::PathResolver;

/// Shared state handed to every repository handler.
#[derive(Clone)]
pub struct RepoState {
    pub storage: Arc<dyn Storage>,
    pub resolver: Arc<PathResolver>,
    pub append_only: bool,
    /// Largest accepted upload, in bytes.
    pub max_object_size: u64,
}

impl RepoState {
    pub fn new(storage: Arc<dyn Storage>, config: &ServerConfig) -> Self {
        Self {
            storage,
            resolver: Arc::new(PathResolver::new(&config.mount_path)),
            append_only: config.append_only,
            max_object_size: config.max_object_size as u64,
        }
    }
}

impl std::fmt::Debug for RepoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoState")
            .field("storage", &self.storage.name())
            .field("mount", &self.resolver.mount())
            .field("append_only", &self.append_only)
            .field("max_object_size", &self.max_object_size)
            .finish()
    }
}
