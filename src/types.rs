use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A workspace as described by the orchestrator. The provider only reads
/// this; the durable entity is the remote compute resource it denotes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workspace {
    /// Opaque ID, doubling as the overlay hostname and the suffix of the
    /// cloud resource name.
    pub id: String,
    /// Display name.
    pub name: String,
    /// API key the bootstrap script uses to download the agent.
    pub api_key: String,
    /// Environment injected into the remote host and the agent service.
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    /// Child projects, used when aggregating workspace info.
    #[serde(default)]
    pub projects: Vec<Project>,
}

/// A container-based unit running inside a workspace's remote host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub workspace_id: String,
    /// Container image to run the project in.
    pub image: String,
    /// User the project container runs as.
    pub user: String,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default)]
    pub repository: Option<GitRepository>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRepository {
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
}

/// Registry credentials used when pulling private project images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRegistry {
    pub server: String,
    pub username: String,
    pub password: String,
}

/// Git provider credentials forwarded to the container engine for clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitProviderConfig {
    pub provider_id: String,
    pub username: String,
    pub token: String,
    #[serde(default)]
    pub base_api_url: Option<String>,
}

/// Workspace-scoped operation request: the raw target options payload plus
/// the workspace it applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRequest {
    pub target_options: String,
    pub workspace: Workspace,
}

/// Project-scoped operation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRequest {
    pub target_options: String,
    pub project: Project,
    #[serde(default)]
    pub container_registry: Option<ContainerRegistry>,
    #[serde(default)]
    pub builder_image: Option<String>,
    #[serde(default)]
    pub git_provider_config: Option<GitProviderConfig>,
}

/// Info returned to the orchestrator for a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub name: String,
    /// Opaque provider-specific blob; see [`WorkspaceMetadata`].
    pub provider_metadata: String,
    #[serde(default)]
    pub projects: Vec<ProjectInfo>,
}

/// Info returned to the orchestrator for a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub workspace_id: String,
    pub created: String,
    pub is_running: bool,
    #[serde(default)]
    pub provider_metadata: String,
}

/// Static provider identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub label: Option<String>,
    pub version: String,
}

/// A target preconfigured by the provider. This provider ships none; users
/// define targets from the manifest instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTarget {
    pub name: String,
    pub provider_info: ProviderInfo,
    /// JSON-encoded target options.
    pub options: String,
}

/// Read-only projection of the remote server attached to workspace info.
///
/// Field names are part of the exported blob format and stay PascalCase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    #[serde(rename = "ServerID")]
    pub server_id: i64,
    #[serde(rename = "ServerName")]
    pub server_name: String,
    #[serde(rename = "ServerMemory")]
    pub server_memory: f32,
    #[serde(rename = "Architecture")]
    pub architecture: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Created")]
    pub created: String,
}
