//! Userspace overlay session backed by a private `tailscaled` instance.
//!
//! Each provider process runs its own daemon with a throwaway state
//! directory and joins the configured coordination server with the key
//! handed over at initialization. Workspaces join the same network under
//! their workspace id, so dialing `<workspace-id>:<port>` through the
//! daemon's SOCKS proxy reaches the machine regardless of where Hetzner
//! placed it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tracing::{debug, info};
use uuid::Uuid;

use super::{socks, Dialer};
use crate::config::ProviderConfig;

const TAILSCALED_BIN: &str = "tailscaled";
const TAILSCALE_BIN: &str = "tailscale";

const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const SOCKET_WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// A running overlay daemon plus the coordinates needed to dial through it.
///
/// The daemon is killed when the session drops. Sessions live for the
/// remainder of the process.
#[derive(Debug)]
pub struct TailscaleSession {
    /// Held for its kill-on-drop effect.
    _daemon: Child,
    socks_addr: SocketAddr,
}

impl TailscaleSession {
    /// Spawn a daemon under `<base_path>/tsnet/<instance>` and log it into
    /// the coordination server named by `config`.
    pub async fn start(config: &ProviderConfig) -> Result<Self> {
        let instance = Uuid::new_v4().to_string();
        let state_dir = state_dir_for(&config.base_path, &instance);
        let hostname = hostname_for(&instance);

        tokio::fs::create_dir_all(&state_dir)
            .await
            .with_context(|| format!("failed to create overlay state dir {}", state_dir.display()))?;

        let socks_port = free_loopback_port().await?;
        let socks_addr = SocketAddr::from(([127, 0, 0, 1], socks_port));
        let socket_path = state_dir.join("tailscaled.sock");

        // Daemon output goes to a file in the state dir, not the console.
        let log_path = state_dir.join("tailscaled.log");
        let log_file = std::fs::File::create(&log_path)
            .with_context(|| format!("failed to create {}", log_path.display()))?;
        let log_file_err = log_file
            .try_clone()
            .context("failed to clone overlay daemon log handle")?;

        let daemon = Command::new(TAILSCALED_BIN)
            .arg("--tun=userspace-networking")
            .arg(format!("--socks5-server=localhost:{socks_port}"))
            .arg(format!("--statedir={}", state_dir.display()))
            .arg(format!("--socket={}", socket_path.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn tailscaled")?;

        debug!(
            pid = daemon.id(),
            state_dir = %state_dir.display(),
            socks_port,
            "overlay daemon spawned"
        );

        wait_for_socket(&socket_path).await?;

        let output = Command::new(TAILSCALE_BIN)
            .arg(format!("--socket={}", socket_path.display()))
            .arg("up")
            .arg(format!("--authkey={}", config.network_key))
            .arg(format!("--login-server={}", config.server_url))
            .arg(format!("--hostname={hostname}"))
            .output()
            .await
            .context("failed to run tailscale up")?;
        if !output.status.success() {
            bail!(
                "tailscale up failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        info!(hostname, "overlay session established");

        Ok(Self {
            _daemon: daemon,
            socks_addr,
        })
    }
}

#[async_trait]
impl Dialer for TailscaleSession {
    async fn dial(&self, workspace_id: &str, port: u16) -> Result<TcpStream> {
        socks::connect(self.socks_addr, workspace_id, port).await
    }
}

fn state_dir_for(base_path: &Path, instance: &str) -> PathBuf {
    base_path.join("tsnet").join(instance)
}

fn hostname_for(instance: &str) -> String {
    format!("hetzner-provider-{instance}")
}

/// Reserve an ephemeral loopback port. The listener is dropped before the
/// daemon starts, so the port can be taken in between; daemon startup fails
/// loudly in that case.
async fn free_loopback_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to reserve a loopback port")?;
    let port = listener
        .local_addr()
        .context("failed to read reserved port")?
        .port();
    Ok(port)
}

async fn wait_for_socket(path: &Path) -> Result<()> {
    let deadline = tokio::time::Instant::now() + SOCKET_WAIT_TIMEOUT;
    loop {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("overlay daemon socket {} did not appear", path.display());
        }
        tokio::time::sleep(SOCKET_WAIT_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_dir_layout() {
        let dir = state_dir_for(Path::new("/var/lib/daytona"), "abc-123");
        assert_eq!(dir, PathBuf::from("/var/lib/daytona/tsnet/abc-123"));
    }

    #[test]
    fn test_hostname_carries_instance() {
        assert_eq!(hostname_for("abc-123"), "hetzner-provider-abc-123");
    }

    #[tokio::test]
    async fn test_free_loopback_port_is_nonzero() {
        let port = free_loopback_port().await.unwrap();
        assert_ne!(port, 0);
    }
}
