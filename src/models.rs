//! Core data types for the kernel build server.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::kernel::build_id::BuildId;

// Pre-compiled validation patterns
static URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://[^/]+").expect("Invalid repository URL regex")
});
static SCP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9._-]+:.+").expect("Invalid scp address regex")
});
static COMMIT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._/~^@{}-]+$").expect("Invalid commit regex")
});

/// A request to build `commit` of `repository`.
///
/// Immutable once validated. `original_command` is the command line the
/// request was parsed from and is relayed verbatim to remote build hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub repository: String,
    pub commit: String,
    pub original_command: String,
}

impl BuildRequest {
    /// Validate and build a request.
    pub fn new(
        repository: impl Into<String>,
        commit: impl Into<String>,
        original_command: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let request = BuildRequest {
            repository: repository.into().trim().to_string(),
            commit: commit.into().trim().to_string(),
            original_command: original_command.into().trim().to_string(),
        };
        validate_repository(&request.repository)?;
        validate_commit(&request.commit)?;
        Ok(request)
    }

    /// Build a request from the option map of a parsed command
    /// (`git_repo` and `commit_id` keys).
    pub fn from_options(
        original_command: &str,
        opts: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let repository = opts.get("git_repo").ok_or_else(|| {
            ConfigError::InvalidRepository("missing git_repo option".to_string())
        })?;
        let commit = opts
            .get("commit_id")
            .ok_or_else(|| ConfigError::InvalidCommit("missing commit_id option".to_string()))?;
        BuildRequest::new(repository.as_str(), commit.as_str(), original_command)
    }
}

/// Repository must be a URL, an scp-style git address or an absolute path.
pub fn validate_repository(repository: &str) -> Result<(), ConfigError> {
    if repository.is_empty() {
        return Err(ConfigError::InvalidRepository(
            "repository cannot be empty".to_string(),
        ));
    }
    if repository.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidRepository(format!(
            "repository contains whitespace: {:?}",
            repository
        )));
    }

    if URL_REGEX.is_match(repository) || SCP_REGEX.is_match(repository) || repository.starts_with('/') {
        Ok(())
    } else {
        Err(ConfigError::InvalidRepository(format!(
            "not a URL, git address or absolute path: {}",
            repository
        )))
    }
}

/// Commit must look like a git revision the build script can pass to git.
pub fn validate_commit(commit: &str) -> Result<(), ConfigError> {
    if commit.is_empty() {
        return Err(ConfigError::InvalidCommit(
            "commit cannot be empty".to_string(),
        ));
    }
    if commit.starts_with('-') {
        return Err(ConfigError::InvalidCommit(format!(
            "commit cannot start with '-': {}",
            commit
        )));
    }
    if commit.contains("..") {
        return Err(ConfigError::InvalidCommit(format!(
            "commit cannot contain '..': {}",
            commit
        )));
    }

    if COMMIT_REGEX.is_match(commit) {
        Ok(())
    } else {
        Err(ConfigError::InvalidCommit(format!(
            "commit contains invalid characters: {:?}",
            commit
        )))
    }
}

/// Read-only snapshot of an orchestrated build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub repository: String,
    pub commit: String,
    pub id: BuildId,
}

/// A compiled kernel image sitting on local disk.
///
/// Handed from the job to the orchestrator once monitoring finds it; only the
/// orchestrator deletes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
}

/// Where an artifact is going. Lives between job completion and upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub local_path: PathBuf,
    pub bucket: String,
    pub blob_name: String,
}

/// How the monitoring phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorResult {
    Found,
    TimedOut,
    Cancelled,
}

impl MonitorResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorResult::Found => "found",
            MonitorResult::TimedOut => "timed_out",
            MonitorResult::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for MonitorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the upload step did with the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Uploaded(ArtifactRecord),
    /// Nothing at the artifact path; zero storage calls were made.
    Skipped,
    Failed(String),
}

/// Result of one orchestrated build, returned by the worker task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub id: BuildId,
    /// Whether the compile step exited zero.
    pub exit_ok: bool,
    pub monitor: MonitorResult,
    pub upload: UploadStatus,
    /// Whether the local artifact is gone after the run.
    pub cleaned_up: bool,
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_ok && matches!(self.upload, UploadStatus::Uploaded(_))
    }
}

/// Outcome of relaying a command to a remote build host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteOutcome {
    /// The host accepted the command; carries the status text it returned.
    Ok(String),
    RemoteFailure(String),
}

impl RemoteOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, RemoteOutcome::Ok(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_trims_and_validates() {
        let req = BuildRequest::new(
            " https://git.kernel.org/pub/scm/linux/kernel/git/torvalds/linux.git ",
            "v6.6\n",
            "gce-xfstests ltm --repo linux.git --commit v6.6",
        )
        .unwrap();
        assert_eq!(req.commit, "v6.6");
        assert!(req.repository.starts_with("https://"));
    }

    #[test]
    fn test_repository_forms() {
        assert!(validate_repository("https://github.com/torvalds/linux.git").is_ok());
        assert!(validate_repository("git://git.kernel.org/linux.git").is_ok());
        assert!(validate_repository("git@github.com:torvalds/linux.git").is_ok());
        assert!(validate_repository("/srv/git/linux").is_ok());

        assert!(validate_repository("").is_err());
        assert!(validate_repository("linux").is_err());
        assert!(validate_repository("https://host/a b").is_err());
    }

    #[test]
    fn test_validation_patterns_compile() {
        assert!(Lazy::force(&URL_REGEX).is_match("https://example.com/linux.git"));
        assert!(Lazy::force(&SCP_REGEX).is_match("git@example.com:linux.git"));
        assert!(Lazy::force(&COMMIT_REGEX).is_match("v6.6"));
    }

    #[test]
    fn test_commit_forms() {
        assert!(validate_commit("a1b2c3d4").is_ok());
        assert!(validate_commit("origin/master").is_ok());
        assert!(validate_commit("HEAD~3").is_ok());
        assert!(validate_commit("v6.6-rc1").is_ok());

        assert!(validate_commit("").is_err());
        assert!(validate_commit("--upload-pack=evil").is_err());
        assert!(validate_commit("main..next").is_err());
        assert!(validate_commit("abc;rm -rf").is_err());
    }

    #[test]
    fn test_from_options() {
        let mut opts = HashMap::new();
        opts.insert("git_repo".to_string(), "https://example.com/linux.git ".to_string());
        opts.insert("commit_id".to_string(), " deadbeef".to_string());

        let req = BuildRequest::from_options("ltm cmd", &opts).unwrap();
        assert_eq!(req.repository, "https://example.com/linux.git");
        assert_eq!(req.commit, "deadbeef");

        opts.remove("commit_id");
        assert!(matches!(
            BuildRequest::from_options("ltm cmd", &opts),
            Err(ConfigError::InvalidCommit(_))
        ));
    }

    #[test]
    fn test_outcome_success_requires_upload() {
        let record = ArtifactRecord {
            local_path: PathBuf::from("/tmp/bzImage"),
            bucket: "b".to_string(),
            blob_name: "bzImage".to_string(),
        };
        let mut outcome = BuildOutcome {
            id: BuildId::parse("20240101120000").unwrap(),
            exit_ok: true,
            monitor: MonitorResult::Found,
            upload: UploadStatus::Uploaded(record),
            cleaned_up: true,
        };
        assert!(outcome.is_success());

        outcome.upload = UploadStatus::Skipped;
        assert!(!outcome.is_success());
    }
}
