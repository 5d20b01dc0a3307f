//! Authenticated HTTP session with a build host.

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use super::status::{extract_status, interpret};
use crate::error::RemoteError;
use crate::models::RemoteOutcome;

const LOGIN_PATH: &str = "/login";
const COMMAND_PATH: &str = "/gce-xfstests";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Read the login payload. Its contents are never logged.
pub fn load_credentials(path: &Path) -> Result<Value, RemoteError> {
    let credentials_err = |reason: String| RemoteError::Credentials {
        path: path.display().to_string(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| credentials_err(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| credentials_err(e.to_string()))
}

/// One login-then-command exchange. Cookies from the login carry over to the
/// command call.
pub struct RemoteSession {
    client: Client,
    base_url: String,
    status: Option<String>,
}

impl RemoteSession {
    pub fn new(base_url: impl Into<String>, accept_invalid_certs: bool) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(RemoteSession {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            status: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Status text from the last command response.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Whether the host answers HTTP at all. Any response counts.
    pub async fn is_reachable(&self) -> bool {
        self.client.get(&self.base_url).send().await.is_ok()
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<String, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        log::debug!("[Remote] POST {} returned {}", path, status);
        Ok(text)
    }

    /// POST the credentials. The response is logged but not checked; a
    /// rejected login shows up in the command status.
    pub async fn login(&self, credentials: &Value) -> Result<String, RemoteError> {
        self.post_json(LOGIN_PATH, credentials).await
    }

    /// POST the command and classify the response.
    pub async fn submit(&mut self, command: &Value) -> Result<RemoteOutcome, RemoteError> {
        let body = self.post_json(COMMAND_PATH, command).await?;
        self.status = extract_status(&body);
        Ok(interpret(&body))
    }
}
