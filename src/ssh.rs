//! Shell transport to a workspace host, tunnelled over the overlay.
//!
//! The workspace agent runs an ssh endpoint on the fixed agent port that
//! accepts the `daytona` user without credentials; the overlay provides the
//! confidentiality boundary. Sessions are opened per operation and closed
//! when the operation finishes.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use russh::client;
use russh::{ChannelMsg, Disconnect};
use tracing::debug;

use crate::overlay::{Dialer, AGENT_SSH_PORT};

/// Account the bootstrap script provisions on every workspace host.
pub const SSH_USER: &str = "daytona";

struct ClientHandler;

#[async_trait::async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Host keys are fresh per workspace and the overlay already
    // authenticates the peer, so any key is acceptable.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated shell session with one workspace host.
pub struct SshSession {
    handle: client::Handle<ClientHandler>,
    workspace_id: String,
}

impl SshSession {
    /// Dial the workspace's agent port and complete the ssh handshake.
    pub async fn connect(dialer: &dyn Dialer, workspace_id: &str) -> Result<Self> {
        let stream = dialer
            .dial(workspace_id, AGENT_SSH_PORT)
            .await
            .with_context(|| format!("failed to dial {workspace_id}:{AGENT_SSH_PORT}"))?;

        let config = Arc::new(client::Config::default());
        let mut handle = client::connect_stream(config, stream, ClientHandler)
            .await
            .context("ssh handshake failed")?;

        let authenticated = handle
            .authenticate_none(SSH_USER)
            .await
            .context("ssh authentication failed")?;
        if !authenticated {
            bail!("ssh authentication rejected for user {SSH_USER}");
        }

        debug!(workspace_id, "ssh session established");
        Ok(Self {
            handle,
            workspace_id: workspace_id.to_string(),
        })
    }

    /// Run `command` on the host and collect its combined output.
    ///
    /// A missing or non-zero exit status is an error carrying the output.
    pub async fn exec(&self, command: &str) -> Result<String> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .context("failed to open ssh channel")?;
        channel
            .exec(true, command)
            .await
            .with_context(|| format!("failed to start remote command: {command}"))?;

        let mut output = Vec::new();
        let mut status = None;
        loop {
            let Some(msg) = channel.wait().await else {
                break;
            };
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
                _ => {}
            }
        }

        let output = String::from_utf8_lossy(&output).into_owned();
        match status {
            Some(0) => {
                debug!(workspace_id = %self.workspace_id, command, "remote command done");
                Ok(output)
            }
            Some(code) => bail!("remote command `{command}` exited with {code}: {output}"),
            None => bail!("remote command `{command}` closed without an exit status"),
        }
    }

    /// Tear the session down. Errors only on protocol-level failure.
    pub async fn close(self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .context("failed to close ssh session")?;
        Ok(())
    }
}
