//! Configuration module for the build server.
//!
//! `ServerConfig` gathers every path, interval and endpoint the orchestrator
//! and remote coordinator consume. All fields are defaulted so a partial
//! config file (or none at all) yields a working setup on a build host.
//!
//! # Module Structure
//!
//! - `loader`: Loads configurations from `.json` or `.toml` files

pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use loader::{get_default_config_path, load_config_from_file, save_config_to_file};

/// Bounded exponential backoff used while waiting for a provisioned host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        ReadinessPolicy {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 12,
        }
    }
}

impl ReadinessPolicy {
    /// Delay before readiness attempt `attempt` (zero based), doubling up to the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Build server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Logging
    pub service_name: String,
    pub log_root: PathBuf,

    // Build job
    pub repo_cache_root: PathBuf,
    pub image_relpath: PathBuf,
    pub image_name: String,
    pub build_script: PathBuf,
    pub monitor_interval_secs: u64,
    /// `None` polls until the artifact appears.
    pub monitor_timeout_secs: Option<u64>,
    pub min_free_disk_gb: u64,

    // Storage
    pub gs_bucket: String,
    pub storage_endpoint: String,

    // GCE
    pub gce_project: String,
    pub gce_zone: String,
    pub compute_endpoint: String,
    pub metadata_endpoint: String,
    pub access_token: Option<String>,

    // Remote build host
    pub bldsrv_instance: String,
    pub launch_command: Vec<String>,
    pub credential_file: PathBuf,
    pub accept_invalid_certs: bool,
    pub readiness: ReadinessPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            service_name: "bldsrv".to_string(),
            log_root: PathBuf::from("/var/log/bldsrv/bldsrv_logs"),
            repo_cache_root: PathBuf::from("/root/builds"),
            image_relpath: PathBuf::from("arch/x86/boot/bzImage"),
            image_name: "bzImage".to_string(),
            build_script: PathBuf::from("/usr/local/lib/buildkernel.sh"),
            monitor_interval_secs: 30,
            monitor_timeout_secs: Some(30 * 60),
            min_free_disk_gb: 0,
            gs_bucket: String::new(),
            storage_endpoint: "https://storage.googleapis.com".to_string(),
            gce_project: String::new(),
            gce_zone: String::new(),
            compute_endpoint: "https://compute.googleapis.com".to_string(),
            metadata_endpoint: "http://metadata.google.internal".to_string(),
            access_token: None,
            bldsrv_instance: "xfstests-bldsrv".to_string(),
            launch_command: vec!["gce-xfstests".to_string(), "launch-bldsrv".to_string()],
            credential_file: PathBuf::from("pwd.json"),
            accept_invalid_certs: true,
            readiness: ReadinessPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Region derived from the zone (`us-central1-a` -> `us-central1`).
    pub fn gce_region(&self) -> String {
        let zone = self.gce_zone.trim();
        match zone.char_indices().rev().nth(1) {
            Some((idx, _)) => zone[..idx].to_string(),
            None => String::new(),
        }
    }

    /// Service log file, `<log_root>/../<service>.log`.
    pub fn server_log_file(&self) -> PathBuf {
        let parent = self.log_root.parent().unwrap_or_else(|| Path::new("/"));
        parent.join(format!("{}.log", self.service_name))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn monitor_timeout(&self) -> Option<Duration> {
        self.monitor_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_build_host_layout() {
        let config = ServerConfig::default();
        assert_eq!(config.log_root, PathBuf::from("/var/log/bldsrv/bldsrv_logs"));
        assert_eq!(
            config.server_log_file(),
            PathBuf::from("/var/log/bldsrv/bldsrv.log")
        );
        assert_eq!(config.image_name, "bzImage");
        assert_eq!(config.monitor_timeout(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_gce_region_strips_zone_suffix() {
        let mut config = ServerConfig::default();
        config.gce_zone = "us-central1-a".to_string();
        assert_eq!(config.gce_region(), "us-central1");

        config.gce_zone = String::new();
        assert_eq!(config.gce_region(), "");
    }

    #[test]
    fn test_readiness_backoff_is_capped() {
        let policy = ReadinessPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let mut config = ServerConfig::default();
        config.monitor_interval_secs = 0;
        assert_eq!(config.monitor_interval(), Duration::from_secs(1));
    }
}
