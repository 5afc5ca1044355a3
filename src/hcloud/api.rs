use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Public Hetzner Cloud API endpoint.
const DEFAULT_ENDPOINT: &str = "https://api.hetzner.cloud/v1";

/// Per-request wall clock limit. Long-running provider work is modeled as
/// actions polled separately, so individual calls never legitimately take
/// this long.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerType {
    pub id: i64,
    pub name: String,
    pub cores: u32,
    /// Memory in GB as reported by the provider.
    pub memory: f32,
    pub architecture: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub id: i64,
    /// System images have names; snapshots may not.
    pub name: Option<String>,
    pub architecture: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Datacenter {
    pub id: i64,
    pub name: String,
    pub location: Location,
}

/// Provider-reported server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Initializing,
    Starting,
    Running,
    Stopping,
    Off,
    Deleting,
    Migrating,
    Rebuilding,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub status: ServerStatus,
    pub created: DateTime<Utc>,
    pub server_type: ServerType,
    pub datacenter: Datacenter,
    /// IDs of attached volumes, in provider order.
    #[serde(default)]
    pub volumes: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Volume {
    pub id: i64,
    pub name: String,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionError {
    pub code: String,
    pub message: String,
}

/// A long-running provider-side operation, polled by ID until it settles.
#[derive(Debug, Clone, Deserialize)]
pub struct Action {
    pub id: i64,
    pub command: String,
    pub status: ActionStatus,
    pub error: Option<ActionError>,
}

/// Parameters for server creation.
#[derive(Debug, Serialize)]
pub struct ServerCreateSpec<'a> {
    pub name: &'a str,
    pub server_type: i64,
    pub image: i64,
    pub location: &'a str,
    pub user_data: &'a str,
    pub start_after_create: bool,
    pub automount: bool,
    pub volumes: &'a [i64],
}

#[derive(Serialize)]
struct VolumeCreateBody<'a> {
    name: &'a str,
    size: u32,
    location: &'a str,
    format: &'a str,
}

#[derive(Deserialize)]
struct LocationsResponse {
    locations: Vec<Location>,
}

#[derive(Deserialize)]
struct ServerTypesResponse {
    server_types: Vec<ServerType>,
}

#[derive(Deserialize)]
struct ImagesResponse {
    images: Vec<Image>,
}

#[derive(Deserialize)]
struct ServersResponse {
    servers: Vec<Server>,
}

#[derive(Deserialize)]
struct VolumeCreateResponse {
    volume: Volume,
}

#[derive(Deserialize)]
struct ServerCreateResponse {
    server: Server,
}

#[derive(Deserialize)]
struct ActionResponse {
    action: Action,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    code: String,
    message: String,
}

/// Thin bearer-authenticated client for the Hetzner Cloud REST API.
///
/// One instance is built per lifecycle operation from that operation's
/// target options; nothing is cached between calls.
pub struct ApiClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl ApiClient {
    /// Build a client for the given bearer token. `endpoint` overrides the
    /// public API URL, which the tests use to point at a local fake.
    pub fn new(token: &str, endpoint: Option<&str>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build hetzner http client")?;

        Ok(Self {
            http,
            endpoint: endpoint.unwrap_or(DEFAULT_ENDPOINT).trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub async fn location_by_name(&self, name: &str) -> Result<Location> {
        let response: LocationsResponse = self
            .get_query("/locations", &[("name", name)])
            .await
            .context("failed to list locations")?;
        response
            .locations
            .into_iter()
            .next()
            .with_context(|| format!("location not found: {name}"))
    }

    pub async fn server_type_by_name(&self, name: &str) -> Result<ServerType> {
        let response: ServerTypesResponse = self
            .get_query("/server_types", &[("name", name)])
            .await
            .context("failed to list server types")?;
        response
            .server_types
            .into_iter()
            .next()
            .with_context(|| format!("server type not found: {name}"))
    }

    pub async fn image_by_name_and_architecture(
        &self,
        name: &str,
        architecture: &str,
    ) -> Result<Image> {
        let response: ImagesResponse = self
            .get_query("/images", &[("name", name), ("architecture", architecture)])
            .await
            .context("failed to list images")?;
        response
            .images
            .into_iter()
            .next()
            .with_context(|| format!("image not found: {name} ({architecture})"))
    }

    pub async fn create_volume(&self, name: &str, size: u32, location: &str) -> Result<Volume> {
        debug!(name, size, location, "creating volume");
        let body = VolumeCreateBody {
            name,
            size,
            location,
            format: "ext4",
        };
        let response = self
            .http
            .post(format!("{}/volumes", self.endpoint))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("volume create request failed")?;
        let response: VolumeCreateResponse = Self::parse(response, "volume create").await?;
        Ok(response.volume)
    }

    pub async fn delete_volume(&self, id: i64) -> Result<()> {
        debug!(id, "deleting volume");
        let response = self
            .http
            .delete(format!("{}/volumes/{id}", self.endpoint))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("volume delete request failed")?;
        Self::check_status(response, "volume delete").await?;
        Ok(())
    }

    pub async fn create_server(&self, spec: &ServerCreateSpec<'_>) -> Result<Server> {
        debug!(name = spec.name, location = spec.location, "creating server");
        let response = self
            .http
            .post(format!("{}/servers", self.endpoint))
            .bearer_auth(&self.token)
            .json(spec)
            .send()
            .await
            .context("server create request failed")?;
        let response: ServerCreateResponse = Self::parse(response, "server create").await?;
        Ok(response.server)
    }

    /// Look up a server by its exact name. Absence is an error; the caller
    /// never distinguishes "not found" from any other API failure.
    pub async fn server_by_name(&self, name: &str) -> Result<Server> {
        let response: ServersResponse = self
            .get_query("/servers", &[("name", name)])
            .await
            .context("failed to list servers")?;
        response
            .servers
            .into_iter()
            .next()
            .with_context(|| format!("server not found: {name}"))
    }

    pub async fn poweron(&self, server_id: i64) -> Result<Action> {
        self.server_action(server_id, "poweron").await
    }

    pub async fn poweroff(&self, server_id: i64) -> Result<Action> {
        self.server_action(server_id, "poweroff").await
    }

    /// Delete a server, returning the provider action that tracks the
    /// deletion's progress.
    pub async fn delete_server(&self, server_id: i64) -> Result<Action> {
        debug!(server_id, "deleting server");
        let response = self
            .http
            .delete(format!("{}/servers/{server_id}", self.endpoint))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("server delete request failed")?;
        let response: ActionResponse = Self::parse(response, "server delete").await?;
        Ok(response.action)
    }

    pub async fn action(&self, id: i64) -> Result<Action> {
        let response = self
            .http
            .get(format!("{}/actions/{id}", self.endpoint))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("action status request failed")?;
        let response: ActionResponse = Self::parse(response, "action status").await?;
        Ok(response.action)
    }

    async fn server_action(&self, server_id: i64, action: &str) -> Result<Action> {
        debug!(server_id, action, "requesting server action");
        let response = self
            .http
            .post(format!(
                "{}/servers/{server_id}/actions/{action}",
                self.endpoint
            ))
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("server {action} request failed"))?;
        let response: ActionResponse = Self::parse(response, action).await?;
        Ok(response.action)
    }

    async fn get_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .http
            .get(format!("{}{path}", self.endpoint))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;
        Self::parse(response, path).await
    }

    /// Decode a 2xx response body, or surface the API's error envelope.
    async fn parse<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        let response = Self::check_status(response, what).await?;
        response
            .json()
            .await
            .with_context(|| format!("{what}: failed to decode response"))
    }

    async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if let Ok(envelope) = serde_json::from_str::<ApiErrorBody>(&body) {
            bail!(
                "{what} failed: {} ({})",
                envelope.error.message,
                envelope.error.code
            );
        }
        bail!("{what} failed with status {status}");
    }
}
