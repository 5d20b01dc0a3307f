//! Unified error type hierarchy for the kernel build server
//!
//! Provides structured error handling with ConfigError, BuildError,
//! StorageError and RemoteError. Only `ConfigError` ever crosses back to the
//! caller of a constructor; the others are reported through job outcomes.

use std::io;
use thiserror::Error;

/// Configuration and request validation errors.
///
/// Raised synchronously by constructors, before any job is started.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid TOML in config: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid repository: {0}")]
    InvalidRepository(String),

    #[error("Invalid commit reference: {0}")]
    InvalidCommit(String),

    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Build job execution errors.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Failed to open log file {path}: {reason}")]
    LogFile { path: String, reason: String },

    #[error("Build script failed to start: {0}")]
    SpawnFailed(String),

    #[error("Invalid job phase transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Build cancelled")]
    Cancelled,

    #[error("Build worker aborted: {0}")]
    WorkerAborted(String),

    #[error("IO error during build: {0}")]
    Io(#[from] io::Error),
}

/// Artifact storage errors. Fatal for the job that hit them.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Bucket lookup failed for {bucket}: {reason}")]
    LookupFailed { bucket: String, reason: String },

    #[error("Upload of {blob} to {bucket} failed: {reason}")]
    UploadFailed {
        bucket: String,
        blob: String,
        reason: String,
    },

    #[error("Access token unavailable: {0}")]
    Token(String),

    #[error("IO error during upload: {0}")]
    Io(#[from] io::Error),
}

/// Remote build host handoff errors.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Command '{cmd}' failed: {reason}")]
    Command { cmd: String, reason: String },

    #[error("Provisioning API error: {0}")]
    Provisioning(String),

    #[error("Build host {instance} not reachable after {attempts} attempts")]
    HostUnreachable { instance: String, attempts: u32 },

    #[error("Credential file {path} unreadable: {reason}")]
    Credentials { path: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Build host relay aborted: {0}")]
    WorkerAborted(String),
}

/// Top-level result type for binary glue code.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidCommit("has whitespace".to_string());
        assert_eq!(err.to_string(), "Invalid commit reference: has whitespace");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::UploadFailed {
            bucket: "kbuild".to_string(),
            blob: "bzImage".to_string(),
            reason: "503".to_string(),
        };
        assert_eq!(err.to_string(), "Upload of bzImage to kbuild failed: 503");
    }

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::HostUnreachable {
            instance: "xfstests-bldsrv".to_string(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "Build host xfstests-bldsrv not reachable after 3 attempts"
        );
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err("test error".into());
        assert!(result.is_err());
    }
}
