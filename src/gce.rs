//! GCE metadata server access and OAuth token sourcing.

use reqwest::Client;
use serde::Deserialize;

use crate::config::ServerConfig;

const METADATA_FLAVOR: (&str, &str) = ("Metadata-Flavor", "Google");

/// Client for the instance metadata server.
#[derive(Clone, Debug)]
pub struct MetadataClient {
    client: Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl MetadataClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        MetadataClient {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_text(&self, path: &str) -> Result<String, String> {
        let url = format!("{}/computeMetadata/v1/{}", self.endpoint, path);
        let response = self
            .client
            .get(&url)
            .header(METADATA_FLAVOR.0, METADATA_FLAVOR.1)
            .send()
            .await
            .map_err(|e| format!("metadata request {} failed: {}", path, e))?;
        if !response.status().is_success() {
            return Err(format!(
                "metadata request {} returned {}",
                path,
                response.status()
            ));
        }
        response
            .text()
            .await
            .map(|text| text.trim().to_string())
            .map_err(|e| format!("metadata response {} unreadable: {}", path, e))
    }

    /// OAuth token of the instance's default service account.
    pub async fn access_token(&self) -> Result<String, String> {
        let body = self
            .get_text("instance/service-accounts/default/token")
            .await?;
        serde_json::from_str::<TokenResponse>(&body)
            .map(|t| t.access_token)
            .map_err(|e| format!("malformed token response: {}", e))
    }

    pub async fn project_id(&self) -> Result<String, String> {
        self.get_text("project/project-id").await
    }

    /// Zone name, from `projects/<num>/zones/<zone>`.
    pub async fn zone(&self) -> Result<String, String> {
        let full = self.get_text("instance/zone").await?;
        Ok(full.rsplit('/').next().unwrap_or_default().to_string())
    }

    /// A custom instance attribute, e.g. `gs_bucket`.
    pub async fn instance_attribute(&self, name: &str) -> Result<String, String> {
        self.get_text(&format!("instance/attributes/{}", name)).await
    }
}

/// Where bearer tokens for Google APIs come from.
#[derive(Clone, Debug)]
pub enum TokenSource {
    Static(String),
    Metadata(MetadataClient),
}

impl TokenSource {
    pub fn from_config(config: &ServerConfig) -> Self {
        match config.access_token.as_deref() {
            Some(token) if !token.is_empty() => TokenSource::Static(token.to_string()),
            _ => TokenSource::Metadata(MetadataClient::new(config.metadata_endpoint.clone())),
        }
    }

    pub async fn token(&self) -> Result<String, String> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Metadata(client) => client.access_token().await,
        }
    }
}

/// Fill empty project, zone and bucket settings from the metadata server.
///
/// Lookups that fail are logged and leave the field empty.
pub async fn resolve_from_metadata(config: &mut ServerConfig) {
    let metadata = MetadataClient::new(config.metadata_endpoint.clone());

    if config.gce_project.is_empty() {
        match metadata.project_id().await {
            Ok(project) => config.gce_project = project,
            Err(e) => log::warn!("[Config] Could not resolve GCE project: {}", e),
        }
    }
    if config.gce_zone.is_empty() {
        match metadata.zone().await {
            Ok(zone) => config.gce_zone = zone,
            Err(e) => log::warn!("[Config] Could not resolve GCE zone: {}", e),
        }
    }
    if config.gs_bucket.is_empty() {
        match metadata.instance_attribute("gs_bucket").await {
            Ok(bucket) => config.gs_bucket = bucket,
            Err(e) => log::warn!("[Config] Could not resolve GS bucket: {}", e),
        }
    }
}
