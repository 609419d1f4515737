use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;

use reposerve_store::{InMemoryStorage, LocalStorage, Storage};

use crate::config::{ServerConfig, StorageConfig};
use crate::error::ServerResult;
use crate::router::build_router;
use crate::state::RepoState;

/// REST repository server.
///
/// Holds no listening socket of its own: [`RepoServer::bind`] attaches the
/// repository routes to a router owned by the caller, and
/// [`RepoServer::shutdown`] asks every server future that awaits
/// [`RepoServer::shutdown_signal`] to drain and stop.
#[derive(Clone)]
pub struct RepoServer {
    config: ServerConfig,
    storage: Arc<dyn Storage>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RepoServer {
    pub fn new(config: ServerConfig, storage: Arc<dyn Storage>) -> ServerResult<Self> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            storage,
            shutdown: Arc::new(shutdown),
        })
    }

    /// Build a server with the storage backend named in the configuration.
    pub fn from_config(config: ServerConfig) -> ServerResult<Self> {
        let storage: Arc<dyn Storage> = match &config.storage {
            StorageConfig::Memory => Arc::new(InMemoryStorage::new()),
            StorageConfig::Local { root } => Arc::new(LocalStorage::new(root)?),
        };
        Self::new(config, storage)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// The repository routes on their own (useful for testing).
    pub fn router(&self) -> Router {
        let state = RepoState::new(Arc::clone(&self.storage), &self.config);
        build_router(state, &self.config)
    }

    /// Attach the repository routes to an externally owned router.
    pub fn bind(&self, router: Router) -> Router {
        router.merge(self.router())
    }

    /// How strictly write-once objects are protected against racing creates.
    ///
    /// `"atomic"` when the backend commits create-only writes atomically,
    /// otherwise `"best-effort"`: two concurrent first writes may both land.
    pub fn create_guarantee(&self) -> &'static str {
        if self.storage.atomic_create() {
            "atomic"
        } else {
            "best-effort"
        }
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once [`RepoServer::shutdown`] has been called.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown.subscribe();
        async move {
            let _ = rx.wait_for(|stop| *stop).await;
        }
    }

    /// Serve on a listener bound by the caller until shutdown is requested.
    pub async fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            %addr,
            mount = %self.config.mount_path,
            storage = self.storage.name(),
            append_only = self.config.append_only,
            create = self.create_guarantee(),
            "repository server listening"
        );
        if !self.storage.atomic_create() {
            tracing::warn!(
                storage = self.storage.name(),
                "backend cannot create atomically; concurrent writes of one write-once object may both succeed"
            );
        }
        axum::serve(listener, self.bind(Router::new()))
            .with_graceful_shutdown(self.shutdown_signal())
            .await?;
        tracing::info!("repository server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for RepoServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoServer")
            .field("config", &self.config)
            .field("storage", &self.storage.name())
            .finish()
    }
}
