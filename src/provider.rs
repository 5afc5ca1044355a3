//! The lifecycle controller: the provider's public operation surface.
//!
//! Every operation follows the same protocol: read the configuration
//! snapshot (failing fast if `initialize` never ran), open a scoped log
//! sink, decode target options where the operation needs them, run the
//! body, and write a diagnostic line to the sink for any failure before
//! returning it unchanged. Project operations assume the owning workspace
//! is already reachable; only workspace create/start run the reachability
//! wait.

use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::bootstrap;
use crate::config::{ConfigHolder, InitializeProviderRequest, ProviderConfig};
use crate::docker::{BollardEngine, ContainerEngine, CreateProjectOptions, DockerTransport};
use crate::error::{ProviderError, Result};
use crate::hcloud::ComputeManager;
use crate::logs::LogSink;
use crate::overlay::{wait_for_reachable, Dialer, OverlayManager};
use crate::ssh::SshSession;
use crate::target::{target_manifest, TargetOptions, TargetProperty};
use crate::types::{
    Project, ProjectInfo, ProjectRequest, ProviderInfo, ProviderTarget, WorkspaceInfo,
    WorkspaceMetadata, WorkspaceRequest,
};

const PROVIDER_NAME: &str = "hetzner-provider";
const PROVIDER_LABEL: &str = "Hetzner";

/// How long workspace create/start wait for the agent to become dialable.
const AGENT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Env var pointing the agent at its log file on the workspace host.
const AGENT_LOG_PATH_ENV: &str = "DAYTONA_AGENT_LOG_FILE_PATH";
const AGENT_LOG_PATH: &str = "/home/daytona/.daytona-agent.log";

/// Home of all workspace state on the remote host.
pub(crate) fn workspace_dir(workspace_id: &str) -> String {
    format!("/home/daytona/{workspace_id}")
}

/// Project directory inside the workspace dir; the suffix doubles as the
/// project container name.
pub(crate) fn project_dir(project: &Project) -> String {
    format!(
        "{}/{}-{}",
        workspace_dir(&project.workspace_id),
        project.workspace_id,
        project.name
    )
}

fn agent_install_command(download_url: &str, api_key: &str) -> String {
    format!(r#"curl -sfL -H "Authorization: Bearer {api_key}" {download_url} | bash"#)
}

/// Write `prefix` + error to the sink when `result` failed, then hand the
/// result back untouched.
async fn logged<T>(log: &LogSink, prefix: &str, result: Result<T>) -> Result<T> {
    if let Err(error) = &result {
        log.write_line(&format!("{prefix}{error}")).await;
    }
    result
}

/// Workspace provider backed by Hetzner Cloud.
///
/// Holds the post-initialize configuration, the process-wide overlay
/// session, and the container-engine delegate. The engine and the dialer
/// are swappable so tests can run the full controller against local fakes;
/// the compute endpoint override points the REST client at a fake API.
pub struct HetznerProvider {
    config: ConfigHolder,
    overlay: OverlayManager,
    engine: Arc<dyn ContainerEngine>,
    dialer_override: Option<Arc<dyn Dialer>>,
    compute_endpoint: Option<String>,
}

impl HetznerProvider {
    pub fn new() -> Self {
        Self {
            config: ConfigHolder::new(),
            overlay: OverlayManager::new(),
            engine: Arc::new(BollardEngine::new()),
            dialer_override: None,
            compute_endpoint: None,
        }
    }

    /// Point the compute manager at an alternative API endpoint.
    pub fn with_compute_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.compute_endpoint = Some(endpoint.into());
        self
    }

    /// Replace the container-engine delegate.
    pub fn with_engine(mut self, engine: Arc<dyn ContainerEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Bypass the overlay session with a fixed dialer.
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer_override = Some(dialer);
        self
    }

    /// Store the orchestrator-supplied configuration. Must run once before
    /// any other operation.
    pub async fn initialize(&self, request: InitializeProviderRequest) -> Result<()> {
        let config = ProviderConfig::from_request(request)
            .map_err(|e| ProviderError::Configuration(format!("{e:#}")))?;
        self.config.set(config).await;
        Ok(())
    }

    pub fn get_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: PROVIDER_NAME.to_string(),
            label: Some(PROVIDER_LABEL.to_string()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn get_target_manifest(&self) -> Vec<TargetProperty> {
        target_manifest()
    }

    pub fn get_preset_targets(&self) -> Vec<ProviderTarget> {
        Vec::new()
    }

    // -------------------------------------------------------------------
    // workspace operations
    // -------------------------------------------------------------------

    /// Provision the workspace: create the volume and server, wait for the
    /// agent to become reachable, then prepare the workspace directory on
    /// the host through the container-engine delegate.
    #[instrument(skip(self, request), fields(workspace_id = %request.workspace.id))]
    pub async fn create_workspace(&self, request: &WorkspaceRequest) -> Result<()> {
        let config = self.config.get().await?;
        let log = LogSink::workspace(config.logs_dir.as_deref(), &request.workspace.id).await;
        let result = self.create_workspace_inner(&config, request, &log).await;
        log.close().await;
        result
    }

    async fn create_workspace_inner(
        &self,
        config: &ProviderConfig,
        request: &WorkspaceRequest,
        log: &LogSink,
    ) -> Result<()> {
        let options = self.parse_options(&request.target_options, log).await?;
        let workspace = &request.workspace;

        let mut env_vars = workspace.env_vars.clone();
        env_vars.insert(AGENT_LOG_PATH_ENV.to_string(), AGENT_LOG_PATH.to_string());
        let install = agent_install_command(&config.agent_download_url, &workspace.api_key);
        let user_data = bootstrap::render(&env_vars, &install);

        let compute = self.compute(&options)?;
        logged(
            log,
            "Failed to create workspace: ",
            compute
                .create_workspace(&workspace.id, &options, &user_data, log)
                .await,
        )
        .await?;

        log.write_line("Waiting for the agent to start").await;
        let dialer = logged(log, "Failed to dial: ", self.dialer(config).await).await?;
        logged(
            log,
            "Failed to dial: ",
            wait_for_reachable(dialer.as_ref(), &workspace.id, AGENT_WAIT_TIMEOUT).await,
        )
        .await?;
        log.write_line("Agent started").await;

        let transport = logged(
            log,
            "Failed to get client: ",
            DockerTransport::open(dialer.clone(), &workspace.id)
                .await
                .map_err(ProviderError::Transport),
        )
        .await?;

        let ssh = logged(
            log,
            "Failed to create ssh client: ",
            SshSession::connect(dialer.as_ref(), &workspace.id)
                .await
                .map_err(ProviderError::Transport),
        )
        .await?;

        let result = self
            .engine
            .create_workspace(&transport, workspace, &workspace_dir(&workspace.id), log, &ssh)
            .await
            .map_err(ProviderError::Delegate);
        if let Err(error) = ssh.close().await {
            warn!(%error, "failed to close ssh session");
        }
        result
    }

    /// Power the workspace server on and wait for the agent.
    #[instrument(skip(self, request), fields(workspace_id = %request.workspace.id))]
    pub async fn start_workspace(&self, request: &WorkspaceRequest) -> Result<()> {
        let config = self.config.get().await?;
        let log = LogSink::workspace(config.logs_dir.as_deref(), &request.workspace.id).await;
        let result = self.start_workspace_inner(&config, request, &log).await;
        log.close().await;
        result
    }

    async fn start_workspace_inner(
        &self,
        config: &ProviderConfig,
        request: &WorkspaceRequest,
        log: &LogSink,
    ) -> Result<()> {
        let options = self.parse_options(&request.target_options, log).await?;

        let compute = self.compute(&options)?;
        logged(
            log,
            "Failed to start workspace: ",
            compute.start_workspace(&request.workspace.id).await,
        )
        .await?;

        let dialer = logged(log, "Failed to dial: ", self.dialer(config).await).await?;
        logged(
            log,
            "Failed to dial: ",
            wait_for_reachable(dialer.as_ref(), &request.workspace.id, AGENT_WAIT_TIMEOUT).await,
        )
        .await
    }

    /// Power the workspace server off. Already stopping or off is a no-op.
    #[instrument(skip(self, request), fields(workspace_id = %request.workspace.id))]
    pub async fn stop_workspace(&self, request: &WorkspaceRequest) -> Result<()> {
        let config = self.config.get().await?;
        let log = LogSink::workspace(config.logs_dir.as_deref(), &request.workspace.id).await;
        let result = self.stop_workspace_inner(request, &log).await;
        log.close().await;
        result
    }

    async fn stop_workspace_inner(&self, request: &WorkspaceRequest, log: &LogSink) -> Result<()> {
        let options = self.parse_options(&request.target_options, log).await?;

        let compute = self.compute(&options)?;
        logged(
            log,
            "Failed to stop workspace: ",
            compute.stop_workspace(&request.workspace.id).await,
        )
        .await
    }

    /// Delete the workspace server and its volumes.
    #[instrument(skip(self, request), fields(workspace_id = %request.workspace.id))]
    pub async fn destroy_workspace(&self, request: &WorkspaceRequest) -> Result<()> {
        let config = self.config.get().await?;
        let log = LogSink::workspace(config.logs_dir.as_deref(), &request.workspace.id).await;
        let result = self.destroy_workspace_inner(request, &log).await;
        log.close().await;
        result
    }

    async fn destroy_workspace_inner(
        &self,
        request: &WorkspaceRequest,
        log: &LogSink,
    ) -> Result<()> {
        let options = self.parse_options(&request.target_options, log).await?;

        let compute = self.compute(&options)?;
        logged(
            log,
            "Failed to destroy workspace: ",
            compute.destroy_workspace(&request.workspace.id).await,
        )
        .await
    }

    /// Inspect the workspace server and aggregate per-project info for
    /// every child project of the request's workspace.
    #[instrument(skip(self, request), fields(workspace_id = %request.workspace.id))]
    pub async fn get_workspace_info(&self, request: &WorkspaceRequest) -> Result<WorkspaceInfo> {
        let mut info = self.workspace_info(request).await?;

        let mut projects = Vec::with_capacity(request.workspace.projects.len());
        for project in &request.workspace.projects {
            let project_request = ProjectRequest {
                target_options: request.target_options.clone(),
                project: project.clone(),
                container_registry: None,
                builder_image: None,
                git_provider_config: None,
            };
            projects.push(self.get_project_info(&project_request).await?);
        }
        info.projects = projects;

        Ok(info)
    }

    async fn workspace_info(&self, request: &WorkspaceRequest) -> Result<WorkspaceInfo> {
        let config = self.config.get().await?;
        let log = LogSink::workspace(config.logs_dir.as_deref(), &request.workspace.id).await;
        let result = self.workspace_info_inner(request, &log).await;
        log.close().await;
        result
    }

    async fn workspace_info_inner(
        &self,
        request: &WorkspaceRequest,
        log: &LogSink,
    ) -> Result<WorkspaceInfo> {
        let options = self.parse_options(&request.target_options, log).await?;

        let compute = self.compute(&options)?;
        let server = logged(
            log,
            "Failed to get workspace info: ",
            compute.server_info(&request.workspace.id).await,
        )
        .await?;

        let metadata = WorkspaceMetadata {
            server_id: server.id,
            server_name: server.name.clone(),
            server_memory: server.server_type.memory,
            architecture: server.server_type.architecture.clone(),
            location: server.datacenter.location.name.clone(),
            created: server.created.to_rfc3339(),
        };
        let provider_metadata = serde_json::to_string(&metadata).map_err(|e| {
            ProviderError::Configuration(format!("failed to serialize workspace metadata: {e}"))
        })?;

        Ok(WorkspaceInfo {
            name: request.workspace.name.clone(),
            provider_metadata,
            projects: Vec::new(),
        })
    }

    // -------------------------------------------------------------------
    // project operations
    // -------------------------------------------------------------------

    /// Create the project container inside its workspace.
    #[instrument(
        skip(self, request),
        fields(workspace_id = %request.project.workspace_id, project = %request.project.name)
    )]
    pub async fn create_project(&self, request: &ProjectRequest) -> Result<()> {
        let config = self.config.get().await?;
        let log = LogSink::project(
            config.logs_dir.as_deref(),
            &request.project.workspace_id,
            &request.project.name,
        )
        .await;
        // Progress spinners upstream can leave the cursor hidden.
        log.write_raw("\x1b[?25h\n").await;
        let result = self.create_project_inner(config.as_ref(), request, &log).await;
        log.close().await;
        result
    }

    async fn create_project_inner(
        &self,
        config: &ProviderConfig,
        request: &ProjectRequest,
        log: &LogSink,
    ) -> Result<()> {
        let (transport, ssh) = self.project_transports(config, request, log).await?;

        let dir = project_dir(&request.project);
        let result = self
            .engine
            .create_project(
                &transport,
                CreateProjectOptions {
                    project: &request.project,
                    project_dir: &dir,
                    container_registry: request.container_registry.as_ref(),
                    builder_image: request.builder_image.as_deref(),
                    git_provider_config: request.git_provider_config.as_ref(),
                    log,
                    ssh: &ssh,
                },
            )
            .await
            .map_err(ProviderError::Delegate);
        if let Err(error) = ssh.close().await {
            warn!(%error, "failed to close ssh session");
        }
        result
    }

    /// Start the project container and the agent inside it.
    #[instrument(
        skip(self, request),
        fields(workspace_id = %request.project.workspace_id, project = %request.project.name)
    )]
    pub async fn start_project(&self, request: &ProjectRequest) -> Result<()> {
        let config = self.config.get().await?;
        let log = LogSink::project(
            config.logs_dir.as_deref(),
            &request.project.workspace_id,
            &request.project.name,
        )
        .await;
        let result = self.start_project_inner(config.as_ref(), request, &log).await;
        log.close().await;
        result
    }

    async fn start_project_inner(
        &self,
        config: &ProviderConfig,
        request: &ProjectRequest,
        log: &LogSink,
    ) -> Result<()> {
        let (transport, ssh) = self.project_transports(config, request, log).await?;

        let dir = project_dir(&request.project);
        let result = self
            .engine
            .start_project(
                &transport,
                CreateProjectOptions {
                    project: &request.project,
                    project_dir: &dir,
                    container_registry: request.container_registry.as_ref(),
                    builder_image: request.builder_image.as_deref(),
                    git_provider_config: request.git_provider_config.as_ref(),
                    log,
                    ssh: &ssh,
                },
                &config.agent_download_url,
            )
            .await
            .map_err(ProviderError::Delegate);
        if let Err(error) = ssh.close().await {
            warn!(%error, "failed to close ssh session");
        }
        result
    }

    /// Stop the project container.
    #[instrument(
        skip(self, request),
        fields(workspace_id = %request.project.workspace_id, project = %request.project.name)
    )]
    pub async fn stop_project(&self, request: &ProjectRequest) -> Result<()> {
        let config = self.config.get().await?;
        let log = LogSink::project(
            config.logs_dir.as_deref(),
            &request.project.workspace_id,
            &request.project.name,
        )
        .await;
        let result = self.stop_project_inner(config.as_ref(), request, &log).await;
        log.close().await;
        result
    }

    async fn stop_project_inner(
        &self,
        config: &ProviderConfig,
        request: &ProjectRequest,
        log: &LogSink,
    ) -> Result<()> {
        let transport = self.docker_transport(config, &request.project.workspace_id, log).await?;
        self.engine
            .stop_project(&transport, &request.project, log)
            .await
            .map_err(ProviderError::Delegate)
    }

    /// Remove the project container and its directory.
    #[instrument(
        skip(self, request),
        fields(workspace_id = %request.project.workspace_id, project = %request.project.name)
    )]
    pub async fn destroy_project(&self, request: &ProjectRequest) -> Result<()> {
        let config = self.config.get().await?;
        let log = LogSink::project(
            config.logs_dir.as_deref(),
            &request.project.workspace_id,
            &request.project.name,
        )
        .await;
        let result = self.destroy_project_inner(config.as_ref(), request, &log).await;
        log.close().await;
        result
    }

    async fn destroy_project_inner(
        &self,
        config: &ProviderConfig,
        request: &ProjectRequest,
        log: &LogSink,
    ) -> Result<()> {
        let (transport, ssh) = self.project_transports(config, request, log).await?;

        let dir = project_dir(&request.project);
        let result = self
            .engine
            .destroy_project(&transport, &request.project, &dir, &ssh)
            .await
            .map_err(ProviderError::Delegate);
        if let Err(error) = ssh.close().await {
            warn!(%error, "failed to close ssh session");
        }
        result
    }

    /// Inspect the project container.
    #[instrument(
        skip(self, request),
        fields(workspace_id = %request.project.workspace_id, project = %request.project.name)
    )]
    pub async fn get_project_info(&self, request: &ProjectRequest) -> Result<ProjectInfo> {
        let config = self.config.get().await?;
        let log = LogSink::project(
            config.logs_dir.as_deref(),
            &request.project.workspace_id,
            &request.project.name,
        )
        .await;
        let result = self.project_info_inner(config.as_ref(), request, &log).await;
        log.close().await;
        result
    }

    async fn project_info_inner(
        &self,
        config: &ProviderConfig,
        request: &ProjectRequest,
        log: &LogSink,
    ) -> Result<ProjectInfo> {
        let transport = self.docker_transport(config, &request.project.workspace_id, log).await?;
        self.engine
            .project_info(&transport, &request.project)
            .await
            .map_err(ProviderError::Delegate)
    }

    // -------------------------------------------------------------------
    // shared plumbing
    // -------------------------------------------------------------------

    async fn parse_options(&self, payload: &str, log: &LogSink) -> Result<TargetOptions> {
        logged(
            log,
            "Failed to parse target options: ",
            TargetOptions::parse(payload),
        )
        .await
    }

    fn compute(&self, options: &TargetOptions) -> Result<ComputeManager> {
        ComputeManager::new(options, self.compute_endpoint.as_deref())
    }

    /// The dial function every remote transport is built on: the override
    /// when one is installed, otherwise the shared overlay session.
    async fn dialer(&self, config: &ProviderConfig) -> Result<Arc<dyn Dialer>> {
        if let Some(dialer) = &self.dialer_override {
            return Ok(dialer.clone());
        }
        let session = self.overlay.session(config).await?;
        Ok(session)
    }

    async fn docker_transport(
        &self,
        config: &ProviderConfig,
        workspace_id: &str,
        log: &LogSink,
    ) -> Result<DockerTransport> {
        let dialer = logged(
            log,
            "Failed to get docker client: ",
            self.dialer(config).await,
        )
        .await?;
        logged(
            log,
            "Failed to get docker client: ",
            DockerTransport::open(dialer, workspace_id)
                .await
                .map_err(ProviderError::Transport),
        )
        .await
    }

    async fn project_transports(
        &self,
        config: &ProviderConfig,
        request: &ProjectRequest,
        log: &LogSink,
    ) -> Result<(DockerTransport, SshSession)> {
        let workspace_id = &request.project.workspace_id;
        let transport = self.docker_transport(config, workspace_id, log).await?;

        let dialer = logged(
            log,
            "Failed to create ssh client: ",
            self.dialer(config).await,
        )
        .await?;
        let ssh = logged(
            log,
            "Failed to create ssh client: ",
            SshSession::connect(dialer.as_ref(), workspace_id)
                .await
                .map_err(ProviderError::Transport),
        )
        .await?;

        Ok((transport, ssh))
    }
}

impl Default for HetznerProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Workspace;

    fn workspace_request() -> WorkspaceRequest {
        WorkspaceRequest {
            target_options: r#"{"Location": "fsn1", "API Token": "token"}"#.to_string(),
            workspace: Workspace {
                id: "123".to_string(),
                name: "demo".to_string(),
                api_key: "ws-key".to_string(),
                ..Default::default()
            },
        }
    }

    // ---------------------------------------------------------------
    // naming conventions
    // ---------------------------------------------------------------

    #[test]
    fn test_remote_directory_layout() {
        assert_eq!(workspace_dir("123"), "/home/daytona/123");

        let project = Project {
            name: "api".to_string(),
            workspace_id: "123".to_string(),
            ..Default::default()
        };
        assert_eq!(project_dir(&project), "/home/daytona/123/123-api");
    }

    #[test]
    fn test_agent_install_command_shape() {
        let command = agent_install_command("https://download.example.com/agent", "secret");
        assert_eq!(
            command,
            r#"curl -sfL -H "Authorization: Bearer secret" https://download.example.com/agent | bash"#
        );
    }

    // ---------------------------------------------------------------
    // static surface
    // ---------------------------------------------------------------

    #[test]
    fn test_provider_identity() {
        let provider = HetznerProvider::new();
        let info = provider.get_info();
        assert_eq!(info.name, "hetzner-provider");
        assert_eq!(info.label.as_deref(), Some("Hetzner"));
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_no_preset_targets() {
        let provider = HetznerProvider::new();
        assert!(provider.get_preset_targets().is_empty());
        assert_eq!(provider.get_target_manifest().len(), 5);
    }

    // ---------------------------------------------------------------
    // initialize preconditions
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_operations_fail_before_initialize() {
        let provider = HetznerProvider::new();
        let err = provider
            .create_workspace(&workspace_request())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Precondition(_)));
        assert!(err.to_string().contains("initialize"));
    }

    #[tokio::test]
    async fn test_initialize_rejects_empty_base_path() {
        let provider = HetznerProvider::new();
        let err = provider
            .initialize(InitializeProviderRequest {
                base_path: String::new(),
                agent_download_url: "https://download.example.com/agent".to_string(),
                agent_version: "0.24.0".to_string(),
                server_url: "https://control.example.com".to_string(),
                network_key: "tskey".to_string(),
                api_url: "https://api.example.com".to_string(),
                api_port: 3986,
                server_port: 3987,
                logs_dir: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }
}
