//! kbuildsrv: kernel build server backend
//!
//! Runs kernel builds on a build host and ships the resulting image to
//! durable storage, or hands a build off to a freshly provisioned build host.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Requests, artifacts and outcomes
//! - **config**: Server configuration and loading
//! - **log_collector**: Service log and per-job logs
//! - **kernel**: Build identifiers, working directories and the build job
//! - **orchestrator**: Job lifecycle, execution, polling and upload
//! - **storage**: Artifact stores (GCS, local directory)
//! - **remote**: Build host provisioning and command relay
//! - **gce**: Compute Engine metadata and tokens

// Core foundational modules
pub mod error;
pub mod models;

pub mod config;

// Decoupled logging: service log plus one log per job
pub mod log_collector;

pub mod gce;
pub mod kernel;
pub mod orchestrator;
pub mod remote;
pub mod storage;

// Re-export the log crate for macro usage
pub use log;

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{BuildError, ConfigError, RemoteError, Result, StorageError};

pub use models::{
    Artifact, ArtifactRecord, BuildInfo, BuildOutcome, BuildRequest, MonitorResult,
    RemoteOutcome, UploadStatus,
};

pub use config::ServerConfig;
pub use kernel::{new_build_id, BuildId, BuildJob};
pub use log_collector::{JobLog, LogCollector};
pub use orchestrator::{BuildHandle, BuildOrchestrator};
pub use remote::{RelayHandle, RemoteBuildCoordinator};
pub use storage::{ArtifactStore, DirStore, GcsStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
