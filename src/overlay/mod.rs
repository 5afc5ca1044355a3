//! Overlay networking: the process-wide tunnel session and the dial
//! primitives built on top of it.
//!
//! Workspaces are addressed by workspace id on the overlay. Everything that
//! talks to a workspace (reachability probes, ssh, the docker transport)
//! goes through [`Dialer`], so tests can substitute loopback routes for the
//! real tunnel.

pub mod socks;
pub mod tailscale;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tracing::debug;

pub use tailscale::TailscaleSession;

use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result};

/// Port the workspace agent's ssh endpoint listens on.
pub const AGENT_SSH_PORT: u16 = 2222;

/// Pause between dial attempts while waiting for a workspace to come up.
const DIAL_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Opens byte streams to `workspace-id:port` over the overlay network.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, workspace_id: &str, port: u16) -> anyhow::Result<TcpStream>;
}

/// Owns the single overlay session for this process.
///
/// The session is created on first use and reused for every subsequent
/// call. A failed creation is returned to the caller but not cached, so a
/// later call gets a fresh attempt. Concurrent first calls create at most
/// one session.
pub struct OverlayManager {
    session: OnceCell<Arc<TailscaleSession>>,
}

impl OverlayManager {
    pub fn new() -> Self {
        Self {
            session: OnceCell::new(),
        }
    }

    pub async fn session(&self, config: &ProviderConfig) -> Result<Arc<TailscaleSession>> {
        let session = self
            .session
            .get_or_try_init(|| async { TailscaleSession::start(config).await.map(Arc::new) })
            .await
            .map_err(ProviderError::Transport)?;
        Ok(session.clone())
    }
}

impl Default for OverlayManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Dial `workspace_id` on the agent ssh port once per second until it
/// accepts a connection or `timeout` elapses.
///
/// The deadline is checked before each attempt, so the elapsed time in the
/// timeout error is at most one interval past `timeout`.
pub async fn wait_for_reachable(
    dialer: &dyn Dialer,
    workspace_id: &str,
    timeout: Duration,
) -> Result<()> {
    let started = tokio::time::Instant::now();
    loop {
        let elapsed = started.elapsed();
        if elapsed > timeout {
            return Err(ProviderError::Timeout {
                what: "dialing",
                minutes: elapsed.as_secs_f64() / 60.0,
            });
        }
        match dialer.dial(workspace_id, AGENT_SSH_PORT).await {
            Ok(stream) => {
                drop(stream);
                debug!(workspace_id, elapsed = ?elapsed, "workspace reachable");
                return Ok(());
            }
            Err(error) => {
                debug!(workspace_id, %error, "workspace not reachable yet");
            }
        }
        tokio::time::sleep(DIAL_RETRY_INTERVAL).await;
    }
}
