use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// URL prefix the repository routes are mounted under.
    pub mount_path: String,
    pub storage: StorageConfig,
    /// Refuse deletes of everything except locks.
    pub append_only: bool,
    /// Largest accepted request body, in bytes.
    pub max_object_size: usize,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            mount_path: "/".into(),
            storage: StorageConfig::default(),
            append_only: false,
            max_object_size: 128 * 1024 * 1024,
            request_timeout_secs: 300,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Volatile, process-local storage.
    Memory,
    /// A directory on the local filesystem.
    Local { root: PathBuf },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local {
            root: PathBuf::from("."),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(s: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> ServerResult<()> {
        if !self.mount_path.starts_with('/') {
            return Err(ServerError::Config(format!(
                "mount_path must start with '/': {:?}",
                self.mount_path
            )));
        }
        if self.mount_path.contains(['*', ':', '{']) {
            return Err(ServerError::Config(format!(
                "mount_path may not contain route parameters: {:?}",
                self.mount_path
            )));
        }
        if self.max_object_size == 0 {
            return Err(ServerError::Config("max_object_size must be non-zero".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ServerError::Config("request_timeout_secs must be non-zero".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
