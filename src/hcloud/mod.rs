pub mod api;

use std::time::Duration;

use anyhow::anyhow;
use tracing::{info, instrument};

pub use api::{Action, ActionStatus, ApiClient, Server, ServerStatus};

use crate::error::{ProviderError, Result};
use crate::logs::LogSink;
use crate::target::TargetOptions;

/// Prefix shared by every cloud resource a workspace owns.
const RESOURCE_NAME_PREFIX: &str = "daytona-";

/// Server types with this name prefix are ARM machines; everything else
/// runs x86.
const ARM_SERVER_TYPE_PREFIX: &str = "cax";

/// Poll interval while waiting for a provider action to settle.
const ACTION_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Deadline for a provider action to settle before the wait gives up.
const ACTION_DEADLINE: Duration = Duration::from_secs(600);

/// Name of the server and volume backing a workspace.
///
/// Name collision at the provider is the uniqueness mechanism: no separate
/// ID store exists, so every operation derives the same name.
pub fn resource_name(workspace_id: &str) -> String {
    format!("{RESOURCE_NAME_PREFIX}{workspace_id}")
}

/// CPU architecture implied by a server type name.
pub fn architecture_for_server_type(server_type: &str) -> &'static str {
    if server_type.starts_with(ARM_SERVER_TYPE_PREFIX) {
        "arm"
    } else {
        "x86"
    }
}

/// High-level manager for the (volume, server) pair backing one workspace.
///
/// Wraps the low-level [`ApiClient`] and provides the workspace-oriented
/// operations the lifecycle controller sequences. One manager is built per
/// lifecycle operation from that operation's target options.
pub struct ComputeManager {
    api: ApiClient,
}

impl ComputeManager {
    /// Build a manager authenticated with the options' API token.
    ///
    /// `endpoint` overrides the public API URL; tests point it at a local
    /// fake.
    pub fn new(options: &TargetOptions, endpoint: Option<&str>) -> Result<Self> {
        let api = ApiClient::new(&options.api_token, endpoint).map_err(ProviderError::Api)?;
        Ok(Self { api })
    }

    /// Provision the volume and server for a new workspace.
    ///
    /// Resolves location, server type, and image by name (architecture
    /// inferred from the server type), creates the volume first, then the
    /// server with the bootstrap payload as first-boot user data, attached
    /// to the volume and configured to start immediately and auto-mount.
    ///
    /// Progress phases are written to `log`. Any lookup or creation failure
    /// aborts the sequence; resources created before the failing step are
    /// not rolled back.
    #[instrument(skip(self, options, user_data, log))]
    pub async fn create_workspace(
        &self,
        workspace_id: &str,
        options: &TargetOptions,
        user_data: &str,
        log: &LogSink,
    ) -> Result<()> {
        let name = resource_name(workspace_id);

        let location = self
            .api
            .location_by_name(&options.location)
            .await
            .map_err(ProviderError::Api)?;

        log.write_line("Creating Hetzner volume").await;
        let volume = self
            .api
            .create_volume(&name, options.disk_size, &location.name)
            .await
            .map_err(ProviderError::Api)?;
        log.write_line("Hetzner volume created").await;

        log.write_line("Creating Hetzner server").await;
        let server_type = self
            .api
            .server_type_by_name(&options.server_type)
            .await
            .map_err(ProviderError::Api)?;

        let architecture = architecture_for_server_type(&options.server_type);
        let image = self
            .api
            .image_by_name_and_architecture(&options.disk_image, architecture)
            .await
            .map_err(ProviderError::Api)?;

        let server = self
            .api
            .create_server(&api::ServerCreateSpec {
                name: &name,
                server_type: server_type.id,
                image: image.id,
                location: &location.name,
                user_data,
                start_after_create: true,
                automount: true,
                volumes: &[volume.id],
            })
            .await
            .map_err(ProviderError::Api)?;
        log.write_line("Hetzner server created").await;

        info!(
            workspace_id,
            server_id = server.id,
            volume_id = volume.id,
            architecture,
            "workspace compute created"
        );
        Ok(())
    }

    /// Power on the workspace server. Already running is a no-op.
    #[instrument(skip(self))]
    pub async fn start_workspace(&self, workspace_id: &str) -> Result<()> {
        let server = self.lookup(workspace_id).await?;

        if server.status == ServerStatus::Running {
            info!(workspace_id, "server already running");
            return Ok(());
        }

        let action = self.api.poweron(server.id).await.map_err(ProviderError::Api)?;
        self.wait_for_action(action).await?;
        info!(workspace_id, "server started");
        Ok(())
    }

    /// Power off the workspace server. A server already stopping or off is
    /// a no-op.
    #[instrument(skip(self))]
    pub async fn stop_workspace(&self, workspace_id: &str) -> Result<()> {
        let server = self.lookup(workspace_id).await?;

        if matches!(server.status, ServerStatus::Stopping | ServerStatus::Off) {
            info!(workspace_id, status = ?server.status, "server already stopped or stopping");
            return Ok(());
        }

        let action = self.api.poweroff(server.id).await.map_err(ProviderError::Api)?;
        self.wait_for_action(action).await?;
        info!(workspace_id, "server stopped");
        Ok(())
    }

    /// Delete the workspace server and every volume attached to it.
    ///
    /// The server's delete action is awaited first; volumes are then
    /// deleted in the order the lookup reported them. A volume-delete
    /// failure aborts the remaining deletions and surfaces that error,
    /// leaving later volumes to the operator.
    #[instrument(skip(self))]
    pub async fn destroy_workspace(&self, workspace_id: &str) -> Result<()> {
        let server = self.lookup(workspace_id).await?;
        let volume_ids = server.volumes.clone();

        let action = self
            .api
            .delete_server(server.id)
            .await
            .map_err(ProviderError::Api)?;
        self.wait_for_action(action).await?;

        for volume_id in volume_ids {
            self.api
                .delete_volume(volume_id)
                .await
                .map_err(ProviderError::Api)?;
        }

        info!(workspace_id, server_id = server.id, "workspace compute destroyed");
        Ok(())
    }

    /// Look up the server backing a workspace. Not-found is an error.
    pub async fn server_info(&self, workspace_id: &str) -> Result<Server> {
        self.lookup(workspace_id).await
    }

    async fn lookup(&self, workspace_id: &str) -> Result<Server> {
        self.api
            .server_by_name(&resource_name(workspace_id))
            .await
            .map_err(ProviderError::Api)
    }

    /// Poll an action until it settles, bounded by [`ACTION_DEADLINE`].
    ///
    /// Settling with an error surfaces the provider's message; running past
    /// the deadline surfaces a timeout instead of blocking forever.
    async fn wait_for_action(&self, action: Action) -> Result<()> {
        let started = tokio::time::Instant::now();
        let deadline = started + ACTION_DEADLINE;
        let mut action = action;

        loop {
            match action.status {
                ActionStatus::Success => return Ok(()),
                ActionStatus::Error => {
                    let detail = action
                        .error
                        .map(|e| format!("{} ({})", e.message, e.code))
                        .unwrap_or_else(|| "unknown action error".to_string());
                    return Err(ProviderError::Api(anyhow!(
                        "action {} failed: {detail}",
                        action.command
                    )));
                }
                ActionStatus::Running => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ProviderError::Timeout {
                    what: "waiting for server action",
                    minutes: started.elapsed().as_secs_f64() / 60.0,
                });
            }

            tokio::time::sleep(ACTION_POLL_INTERVAL).await;
            action = self
                .api
                .action(action.id)
                .await
                .map_err(ProviderError::Api)?;
        }
    }
}
