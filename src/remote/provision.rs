//! Build host provisioning on Compute Engine.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::ServerConfig;
use crate::error::RemoteError;
use crate::gce::TokenSource;

/// Creates the build host and reports where it can be reached.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the host. Only the exit status of the launch step matters.
    async fn launch(&self) -> Result<(), RemoteError>;

    /// Current external address of `instance`, or `None` if it has none yet.
    async fn host_address(&self, instance: &str) -> Result<Option<String>, RemoteError>;
}

#[derive(Deserialize)]
struct Instance {
    #[serde(default)]
    status: Option<String>,
    #[serde(rename = "networkInterfaces", default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Deserialize)]
struct NetworkInterface {
    #[serde(rename = "accessConfigs", default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Deserialize)]
struct AccessConfig {
    #[serde(rename = "natIP", default)]
    nat_ip: Option<String>,
}

impl Instance {
    /// NAT address of the first access config on the last interface, once
    /// the instance is running.
    fn external_address(&self) -> Option<String> {
        if let Some(status) = &self.status {
            if status != "RUNNING" {
                return None;
            }
        }
        self.network_interfaces
            .last()
            .and_then(|nic| nic.access_configs.first())
            .and_then(|ac| ac.nat_ip.clone())
            .filter(|ip| !ip.is_empty())
    }
}

/// Launches the host with an external command and looks it up through the
/// Compute Engine API.
#[derive(Clone, Debug)]
pub struct GceProvisioner {
    client: Client,
    compute_endpoint: String,
    project: String,
    zone: String,
    launch_command: Vec<String>,
    tokens: TokenSource,
}

impl GceProvisioner {
    pub fn new(
        compute_endpoint: impl Into<String>,
        project: impl Into<String>,
        zone: impl Into<String>,
        launch_command: Vec<String>,
        tokens: TokenSource,
    ) -> Self {
        GceProvisioner {
            client: Client::new(),
            compute_endpoint: compute_endpoint.into().trim_end_matches('/').to_string(),
            project: project.into(),
            zone: zone.into(),
            launch_command,
            tokens,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.compute_endpoint.clone(),
            config.gce_project.trim(),
            config.gce_zone.trim(),
            config.launch_command.clone(),
            TokenSource::from_config(config),
        )
    }

    fn instance_url(&self, instance: &str) -> String {
        format!(
            "{}/compute/v1/projects/{}/zones/{}/instances/{}",
            self.compute_endpoint, self.project, self.zone, instance
        )
    }
}

#[async_trait]
impl Provisioner for GceProvisioner {
    async fn launch(&self) -> Result<(), RemoteError> {
        let (program, args) = self
            .launch_command
            .split_first()
            .ok_or_else(|| RemoteError::Command {
                cmd: String::new(),
                reason: "launch command is empty".to_string(),
            })?;
        let cmd = self.launch_command.join(" ");
        log::info!("[Remote] Calling command {}", cmd);

        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| RemoteError::Command {
                cmd: cmd.clone(),
                reason: e.to_string(),
            })?;
        log::info!("[Remote] Command returned {}", status);

        if status.success() {
            Ok(())
        } else {
            Err(RemoteError::Command {
                cmd,
                reason: format!("exited with {}", status),
            })
        }
    }

    async fn host_address(&self, instance: &str) -> Result<Option<String>, RemoteError> {
        let token = self.tokens.token().await.map_err(RemoteError::Provisioning)?;
        let response = self
            .client
            .get(self.instance_url(instance))
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let info: Instance = response.json().await?;
                Ok(info.external_address())
            }
            status => Err(RemoteError::Provisioning(format!(
                "instance lookup for {} returned HTTP {}",
                instance, status
            ))),
        }
    }
}
