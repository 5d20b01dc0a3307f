//! Handing a build off to a separately provisioned build host.
//!
//! The coordinator launches the host, waits until it answers, logs in and
//! relays the original command. It is a single-shot handoff: login and
//! command are sent once each and the host is never torn down here.

pub mod provision;
pub mod session;
pub mod status;

use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use provision::{GceProvisioner, Provisioner};
pub use session::{load_credentials, RemoteSession};
pub use status::extract_status;

use crate::config::{ReadinessPolicy, ServerConfig};
use crate::error::{ConfigError, RemoteError};
use crate::log_collector::JobLog;
use crate::models::RemoteOutcome;

/// Where the relay is going, as resolved at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub instance: String,
    pub project: String,
    pub zone: String,
    pub region: String,
    pub bucket: String,
}

pub struct RemoteBuildCoordinator {
    target: RelayTarget,
    original_command: String,
    command: Value,
    credential_file: PathBuf,
    accept_invalid_certs: bool,
    readiness: ReadinessPolicy,
    provisioner: Arc<dyn Provisioner>,
    log: JobLog,
}

impl RemoteBuildCoordinator {
    /// Resolve the relay target.
    ///
    /// # Errors
    /// `ConfigError::ValidationFailed` when the instance name, project or
    /// zone is empty. Nothing is launched in that case.
    pub fn new(
        config: &ServerConfig,
        original_command: impl Into<String>,
        command: Value,
        log: JobLog,
    ) -> Result<Self, ConfigError> {
        log.info("Starting new build run");
        for (name, value) in [
            ("bldsrv_instance", &config.bldsrv_instance),
            ("gce_project", &config.gce_project),
            ("gce_zone", &config.gce_zone),
        ] {
            if value.trim().is_empty() {
                log.error(format!("{} is not configured", name));
                return Err(ConfigError::ValidationFailed(format!(
                    "{} is not configured",
                    name
                )));
            }
        }

        let target = RelayTarget {
            instance: config.bldsrv_instance.trim().to_string(),
            project: config.gce_project.trim().to_string(),
            zone: config.gce_zone.trim().to_string(),
            region: config.gce_region(),
            bucket: config.gs_bucket.trim().to_string(),
        };
        Ok(RemoteBuildCoordinator {
            target,
            original_command: original_command.into(),
            command,
            credential_file: config.credential_file.clone(),
            accept_invalid_certs: config.accept_invalid_certs,
            readiness: config.readiness.clone(),
            provisioner: Arc::new(GceProvisioner::from_config(config)),
            log,
        })
    }

    /// Replace the Compute Engine provisioner.
    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn target(&self) -> &RelayTarget {
        &self.target
    }

    pub fn original_command(&self) -> &str {
        &self.original_command
    }

    /// Start the handoff on a worker task.
    pub fn run(self) -> RelayHandle {
        log::info!("[Remote] Starting launching build server");
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let task = tokio::spawn(async move { self.relay(worker_cancel).await });
        RelayHandle { cancel, task }
    }

    async fn relay(self, cancel: CancellationToken) -> Result<RemoteOutcome, RemoteError> {
        let result = self.relay_inner(&cancel).await;
        match &result {
            Ok(RemoteOutcome::Ok(status)) => {
                self.log.info(format!("Build host accepted command, status {}", status))
            }
            Ok(RemoteOutcome::RemoteFailure(reason)) => self
                .log
                .error(format!("Failed to send cmd to build server: {}", reason)),
            Err(e) => self.log.error(format!("Build server handoff failed: {}", e)),
        }
        if let Err(e) = self.log.flush().await {
            log::warn!("[Remote] Could not flush relay log: {}", e);
        }
        result
    }

    async fn relay_inner(&self, cancel: &CancellationToken) -> Result<RemoteOutcome, RemoteError> {
        self.log.info("Launching build server");
        if let Err(e) = self.provisioner.launch().await {
            self.log.error("Build server failed to start");
            return Err(e);
        }
        self.log.info("Successfully launched build server");

        let mut session = self.wait_until_ready(cancel).await?;
        self.log.info(format!("Build server reachable at {}", session.base_url()));

        let credentials = load_credentials(&self.credential_file)?;
        self.log.info(format!(
            "gce-xfstests original command line: {}",
            self.original_command
        ));

        let login = session.login(&credentials).await?;
        self.log.info(format!("log in request return: {}", login.trim()));

        let outcome = session.submit(&self.command).await?;
        self.log.info(format!(
            "returned status {}",
            session.status().unwrap_or("<none>")
        ));
        Ok(outcome)
    }

    /// Poll for an address, then for an HTTP answer from it, backing off
    /// between attempts.
    async fn wait_until_ready(&self, cancel: &CancellationToken) -> Result<RemoteSession, RemoteError> {
        let policy = &self.readiness;
        let mut session: Option<RemoteSession> = None;

        for attempt in 0..policy.max_attempts {
            if session.is_none() {
                match self.provisioner.host_address(&self.target.instance).await {
                    Ok(Some(address)) => {
                        self.log.info(format!("Build server ip address: {}", address));
                        session = Some(RemoteSession::new(
                            host_base_url(&address),
                            self.accept_invalid_certs,
                        )?);
                    }
                    Ok(None) => self.log.debug(format!(
                        "{} has no address yet (attempt {})",
                        self.target.instance,
                        attempt + 1
                    )),
                    Err(e) => self.log.warn(format!("Address lookup failed: {}", e)),
                }
            }

            if let Some(s) = session.take() {
                if s.is_reachable().await {
                    return Ok(s);
                }
                self.log.debug(format!("{} not answering yet", s.base_url()));
                session = Some(s);
            }

            if attempt + 1 < policy.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(RemoteError::WorkerAborted("cancelled".to_string()));
                    }
                    _ = tokio::time::sleep(policy.delay_for(attempt)) => {}
                }
            }
        }

        Err(RemoteError::HostUnreachable {
            instance: self.target.instance.clone(),
            attempts: policy.max_attempts,
        })
    }
}

/// `https://<address>` unless the address already names a scheme.
fn host_base_url(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("https://{}", address)
    }
}

/// Handle to a running relay.
pub struct RelayHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<RemoteOutcome, RemoteError>>,
}

impl RelayHandle {
    /// Stop waiting for the build host. Requests already in flight finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<RemoteOutcome, RemoteError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(RemoteError::WorkerAborted(e.to_string())),
        }
    }
}
