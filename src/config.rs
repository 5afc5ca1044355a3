use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ProviderError;

/// Configuration handed to the provider by the orchestrator's `initialize`
/// call. Everything the provider needs beyond per-request target options
/// arrives here exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeProviderRequest {
    /// Provider state root; the overlay session keeps its state under it.
    pub base_path: String,
    /// URL the bootstrap script downloads the agent binary from.
    pub agent_download_url: String,
    /// Agent version the orchestrator expects to be installed.
    pub agent_version: String,
    /// Control-plane URL for the overlay network.
    pub server_url: String,
    /// Overlay network join key.
    pub network_key: String,
    /// Orchestrator API endpoint advertised to the agent.
    pub api_url: String,
    pub api_port: u32,
    pub server_port: u32,
    /// Directory for per-workspace log files. Empty disables file logging.
    pub logs_dir: String,
}

/// Validated provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_path: PathBuf,
    pub agent_download_url: String,
    pub agent_version: String,
    pub server_url: String,
    pub network_key: String,
    pub api_url: String,
    pub api_port: u32,
    pub server_port: u32,
    pub logs_dir: Option<PathBuf>,
}

impl ProviderConfig {
    /// Validate an initialize request into a usable configuration.
    pub fn from_request(req: InitializeProviderRequest) -> Result<Self> {
        ensure!(!req.base_path.is_empty(), "base path must not be empty");

        let logs_dir = if req.logs_dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(req.logs_dir))
        };

        Ok(Self {
            base_path: PathBuf::from(req.base_path),
            agent_download_url: req.agent_download_url,
            agent_version: req.agent_version,
            server_url: req.server_url,
            network_key: req.network_key,
            api_url: req.api_url,
            api_port: req.api_port,
            server_port: req.server_port,
            logs_dir,
        })
    }
}

/// Two-state configuration holder: `None` until `initialize` runs, then a
/// shared snapshot. Every operation that depends on the configuration reads
/// it through [`ConfigHolder::get`] at its top, so uninitialized use fails
/// fast instead of surfacing as a missing field mid-operation.
pub(crate) struct ConfigHolder {
    inner: RwLock<Option<Arc<ProviderConfig>>>,
}

impl ConfigHolder {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub async fn set(&self, config: ProviderConfig) {
        *self.inner.write().await = Some(Arc::new(config));
    }

    /// Current configuration, or `Precondition` if `initialize` never ran.
    pub async fn get(&self) -> crate::error::Result<Arc<ProviderConfig>> {
        self.inner.read().await.clone().ok_or_else(|| {
            ProviderError::Precondition(
                "provider not initialized. Did you forget to call initialize?".to_string(),
            )
        })
    }
}
