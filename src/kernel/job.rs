//! A single kernel build job.
//!
//! The job runs the external build script with `(repository, commit)`,
//! waits for it to exit, then polls for the kernel image. Execution failures
//! are reported by value and logged; the job always proceeds to monitoring.
//! The job never deletes the image: `finish` hands it back to the caller.

use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::BuildError;
use crate::kernel::build_id::BuildId;
use crate::kernel::repo::work_dir_for;
use crate::log_collector::JobLog;
use crate::models::{Artifact, BuildRequest, MonitorResult};
use crate::orchestrator::executor::{run_build_script, script_env, ScriptInvocation};
use crate::orchestrator::monitor::poll_until;
use crate::orchestrator::state::{JobPhase, JobState};

/// Filesystem layout of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    /// `<log_root>/<id>/`
    pub log_dir: PathBuf,
    /// `<log_dir>/run.log`
    pub run_log: PathBuf,
    /// `<log_dir>/<id>.buildlog`
    pub build_log: PathBuf,
    /// `<repo_cache_root>/<sha256(repository)>`
    pub work_dir: PathBuf,
    /// `<work_dir>/<image_relpath>`
    pub artifact: PathBuf,
}

impl JobPaths {
    pub fn new(config: &ServerConfig, id: &BuildId, repository: &str) -> Self {
        let log_dir = config.log_root.join(id.as_str());
        let work_dir = work_dir_for(config, repository);
        JobPaths {
            run_log: log_dir.join("run.log"),
            build_log: log_dir.join(format!("{}.buildlog", id)),
            artifact: work_dir.join(&config.image_relpath),
            log_dir,
            work_dir,
        }
    }
}

pub struct BuildJob {
    id: BuildId,
    repository: String,
    commit: String,
    paths: JobPaths,
    script: PathBuf,
    interval: Duration,
    timeout: Option<Duration>,
    state: JobState,
    /// Set when an image from an earlier build could not be removed; such a
    /// job never reports an image of its own.
    stale_image: bool,
    log: JobLog,
}

impl BuildJob {
    pub fn new(
        request: &BuildRequest,
        id: BuildId,
        paths: JobPaths,
        config: &ServerConfig,
        log: JobLog,
    ) -> Self {
        log.debug(format!("Created build {}", id));
        BuildJob {
            id,
            repository: request.repository.clone(),
            commit: request.commit.clone(),
            paths,
            script: config.build_script.clone(),
            interval: config.monitor_interval(),
            timeout: config.monitor_timeout(),
            state: JobState::new(),
            stale_image: false,
            log,
        }
    }

    pub fn id(&self) -> &BuildId {
        &self.id
    }

    pub fn paths(&self) -> &JobPaths {
        &self.paths
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn phase(&self) -> JobPhase {
        self.state.phase
    }

    /// Remove an image left in the shared work dir by an earlier build.
    async fn discard_stale_image(&mut self) -> bool {
        match tokio::fs::remove_file(&self.paths.artifact).await {
            Ok(()) => {
                self.log.warn(format!(
                    "Removed image left by an earlier build: {}",
                    self.paths.artifact.display()
                ));
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                self.log.error(format!(
                    "Cannot remove earlier image {}: {}",
                    self.paths.artifact.display(),
                    e
                ));
                self.stale_image = true;
                false
            }
        }
    }

    /// Run the build script and wait for it to exit.
    ///
    /// `Ok(true)` iff the script exited zero. Spawn failures, non-zero exits
    /// and cancellation are `Ok(false)`; `Err` only for out-of-order calls.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<bool, BuildError> {
        self.state.transition_to(JobPhase::Started)?;
        self.log.info(format!(
            "Building {} commit={}",
            self.repository, self.commit
        ));

        if !self.discard_stale_image().await {
            self.state.record_exit(false);
            return Ok(false);
        }

        let invocation = ScriptInvocation {
            script: self.script.clone(),
            args: vec![self.repository.clone(), self.commit.clone()],
            work_dir: self.paths.work_dir.clone(),
            env: script_env(&self.paths.work_dir, self.id.as_str()),
            build_log: self.paths.build_log.clone(),
        };

        let exit_ok = match run_build_script(&invocation, cancel, &self.log).await {
            Ok(status) => {
                self.log.info(format!("Build returned {}", status));
                status.success()
            }
            Err(BuildError::Cancelled) => {
                self.log.warn(format!("Build {} cancelled while compiling", self.id));
                false
            }
            Err(e) => {
                self.log.error(format!("Build {} failed to start: {}", self.id, e));
                false
            }
        };

        self.state.record_exit(exit_ok);
        Ok(exit_ok)
    }

    /// Poll for the kernel image.
    ///
    /// Entered whatever `start` returned: a failed compile still gets a full
    /// monitoring window before the job gives up.
    pub async fn monitor(&mut self, cancel: &CancellationToken) -> Result<MonitorResult, BuildError> {
        self.state.transition_to(JobPhase::Monitoring)?;
        if self.state.exit_ok == Some(false) {
            self.log.warn(format!(
                "Build {} did not exit cleanly; monitoring for the image anyway",
                self.id
            ));
        }
        self.log.info(format!(
            "Waiting for {} (interval {:?}, timeout {:?})",
            self.paths.artifact.display(),
            self.interval,
            self.timeout
        ));

        let artifact = self.paths.artifact.clone();
        let log = self.log.clone();
        let id = self.id.clone();
        let stale = self.stale_image;
        let result = poll_until(self.interval, self.timeout, cancel, || {
            log.debug(format!("Querying build {}", id));
            !stale && artifact.is_file()
        })
        .await;

        match result {
            MonitorResult::Found => self.log.info(format!("Build {} produced an image", self.id)),
            MonitorResult::TimedOut => self
                .log
                .error(format!("Build {} timed out waiting for an image", self.id)),
            MonitorResult::Cancelled => self.log.warn(format!("Build {} monitoring cancelled", self.id)),
        }
        self.state.record_monitor(result);
        Ok(result)
    }

    /// Close out the job and hand over the image if one exists.
    pub fn finish(&mut self, result: MonitorResult) -> Result<Option<Artifact>, BuildError> {
        self.state.transition_to(JobPhase::Completed)?;
        let artifact = if result == MonitorResult::Found && self.paths.artifact.is_file() {
            Some(Artifact {
                path: self.paths.artifact.clone(),
            })
        } else {
            None
        };
        self.log.info(format!(
            "Finished ({}), image {}",
            result,
            if artifact.is_some() { "present" } else { "absent" }
        ));
        Ok(artifact)
    }

    /// `start`, `monitor` and `finish` in order.
    pub async fn run(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(bool, MonitorResult, Option<Artifact>), BuildError> {
        let exit_ok = self.start(cancel).await?;
        let result = self.monitor(cancel).await?;
        let artifact = self.finish(result)?;
        Ok((exit_ok, result, artifact))
    }
}
