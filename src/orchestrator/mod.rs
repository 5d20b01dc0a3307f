//! Build orchestration: one build job from request to stored artifact.
//!
//! `BuildOrchestrator::new` does all the synchronous setup (id, log
//! directory, working directory, resource checks) and is the only place a
//! configuration error can surface. `run` moves the orchestrator into a
//! worker task and returns a `BuildHandle`; the worker compiles, monitors,
//! uploads and cleans up, and reports a `BuildOutcome` through the handle.

pub mod executor;
pub mod monitor;
pub mod state;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use monitor::poll_until;
pub use state::{JobPhase, JobState};

use crate::config::ServerConfig;
use crate::error::{BuildError, ConfigError};
use crate::kernel::build_id::BuildId;
use crate::kernel::job::{BuildJob, JobPaths};
use crate::kernel::repo::check_free_space;
use crate::log_collector::JobLog;
use crate::models::{Artifact, ArtifactRecord, BuildInfo, BuildOutcome, BuildRequest, UploadStatus};
use crate::storage::ArtifactStore;

/// Owns one build job end to end.
pub struct BuildOrchestrator {
    info: BuildInfo,
    job: BuildJob,
    store: Arc<dyn ArtifactStore>,
    bucket: String,
    blob_name: String,
    log: JobLog,
}

impl BuildOrchestrator {
    /// Set up a build.
    ///
    /// Allocates the build id, creates `<log_root>/<id>/` and the
    /// repository working directory, and binds a `BuildJob` to them.
    ///
    /// # Errors
    /// Returns `ConfigError` for an unusable configuration (no bucket, log
    /// directory not creatable, not enough free disk). Nothing is started.
    pub fn new(
        config: &ServerConfig,
        request: BuildRequest,
        store: Arc<dyn ArtifactStore>,
    ) -> Result<Self, ConfigError> {
        log::info!("[Build] Launching new build");
        let id = BuildId::new();
        log::info!("[Build] Creating new build with id {}", id);

        if config.gs_bucket.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "no storage bucket configured".to_string(),
            ));
        }

        let paths = JobPaths::new(config, &id, &request.repository);
        fs::create_dir_all(&paths.log_dir)?;

        check_free_space(&config.repo_cache_root, config.min_free_disk_gb)?;
        fs::create_dir_all(&paths.work_dir)?;

        let log = JobLog::open(id.as_str(), &paths.run_log)
            .map_err(ConfigError::ValidationFailed)?;
        log.info(format!("Created new build with id {}", id));
        log.info(format!(
            "Repository {} builds in {}",
            request.repository,
            paths.work_dir.display()
        ));

        let info = BuildInfo {
            repository: request.repository.clone(),
            commit: request.commit.clone(),
            id: id.clone(),
        };
        let job = BuildJob::new(&request, id, paths, config, log.clone());

        Ok(BuildOrchestrator {
            info,
            job,
            store,
            bucket: config.gs_bucket.trim().to_string(),
            blob_name: config.image_name.clone(),
            log,
        })
    }

    pub fn id(&self) -> &BuildId {
        &self.info.id
    }

    /// Repository, commit and id of this build.
    pub fn get_info(&self) -> BuildInfo {
        self.info.clone()
    }

    pub fn paths(&self) -> &JobPaths {
        self.job.paths()
    }

    /// Start the build on a worker task.
    pub fn run(self) -> BuildHandle {
        let info = self.info.clone();
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        log::info!("[Build] Spawning worker for build {}", info.id);

        let task = tokio::spawn(async move { self.execute(worker_cancel).await });
        BuildHandle { info, cancel, task }
    }

    /// Worker body: build, upload, clean up.
    async fn execute(mut self, cancel: CancellationToken) -> Result<BuildOutcome, BuildError> {
        self.log.info(format!("Worker started for build {}", self.info.id));

        let (exit_ok, monitor, artifact) = self.job.run(&cancel).await?;
        let upload = self.upload_artifact(artifact).await;
        let cleaned_up = self.cleanup(&upload).await;

        self.log.info(format!("Exiting worker for build {}", self.info.id));
        if let Err(e) = self.log.flush().await {
            log::warn!("[Build] Could not flush log for {}: {}", self.info.id, e);
        }

        Ok(BuildOutcome {
            id: self.info.id.clone(),
            exit_ok,
            monitor,
            upload,
            cleaned_up,
        })
    }

    /// Upload the image if it is still on disk. No image means no storage
    /// calls at all.
    async fn upload_artifact(&self, artifact: Option<Artifact>) -> UploadStatus {
        let local_path = match artifact.map(|a| a.path).filter(|p| p.is_file()) {
            Some(path) => path,
            None => {
                self.log.info("Could not find kernel image to upload.");
                return UploadStatus::Skipped;
            }
        };

        let record = ArtifactRecord {
            local_path,
            bucket: self.bucket.clone(),
            blob_name: self.blob_name.clone(),
        };
        self.log.info(format!(
            "Uploading {} to {}/{}",
            record.local_path.display(),
            record.bucket,
            record.blob_name
        ));

        let result = match self.store.lookup_bucket(&record.bucket).await {
            Ok(()) => self.store.upload(&record).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.log.info("Upload complete");
                UploadStatus::Uploaded(record)
            }
            Err(e) => {
                self.log.error(format!("Upload failed: {}", e));
                UploadStatus::Failed(e.to_string())
            }
        }
    }

    /// Delete the local image once it is stored (or there was nothing to
    /// store). A failed upload keeps the image for inspection.
    async fn cleanup(&self, upload: &UploadStatus) -> bool {
        self.log.info("Entered cleanup");
        let artifact: PathBuf = self.job.paths().artifact.clone();

        if let UploadStatus::Failed(_) = upload {
            self.log.warn(format!(
                "Keeping {} after failed upload",
                artifact.display()
            ));
            return !artifact.exists();
        }

        if artifact.is_file() {
            if let Err(e) = tokio::fs::remove_file(&artifact).await {
                self.log.error(format!(
                    "Failed to remove {}: {}",
                    artifact.display(),
                    e
                ));
            }
        }
        self.log.info("Finished cleanup");
        !artifact.exists()
    }
}

/// Handle to a running build.
pub struct BuildHandle {
    info: BuildInfo,
    cancel: CancellationToken,
    task: JoinHandle<Result<BuildOutcome, BuildError>>,
}

impl BuildHandle {
    pub fn info(&self) -> &BuildInfo {
        &self.info
    }

    /// Stop the build: kills the compile step and ends monitoring early.
    /// Upload and cleanup still run for whatever is on disk.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker. A panicking worker is reported as
    /// `BuildError::WorkerAborted` rather than propagating the panic.
    pub async fn wait(self) -> Result<BuildOutcome, BuildError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(BuildError::WorkerAborted(e.to_string())),
        }
    }
}
