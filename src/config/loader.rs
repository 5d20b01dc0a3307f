//! Config file loader and serialization.

use crate::config::ServerConfig;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

const SYSTEM_CONFIG_PATH: &str = "/etc/kbuildsrv/config.json";

/// Environment variable that overrides the config location.
pub const CONFIG_ENV_VAR: &str = "KBUILDSRV_CONFIG";

/// Config file format, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

/// Resolve the config path: `$KBUILDSRV_CONFIG`, then `/etc/kbuildsrv/config.json`,
/// then `~/.config/kbuildsrv/config.json`.
///
/// Returns `None` when no candidate exists; callers fall back to defaults.
pub fn get_default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    let system = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system.exists() {
        return Some(system);
    }

    dirs::home_dir()
        .map(|home| home.join(".config/kbuildsrv/config.json"))
        .filter(|path| path.exists())
}

/// Load config from a `.json` or `.toml` file.
pub fn load_config_from_file(path: &Path) -> Result<ServerConfig, ConfigError> {
    let format = validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let config: ServerConfig = match format {
        ConfigFormat::Json => serde_json::from_str(&content)?,
        ConfigFormat::Toml => toml::from_str(&content)?,
    };

    log::debug!("[Config] Loaded configuration from {}", path.display());
    Ok(config)
}

/// Save config as pretty JSON.
pub fn save_config_to_file(config: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json_content = serde_json::to_string_pretty(config)?;
    fs::write(path, json_content)?;

    Ok(())
}

/// Validate config path (.json or .toml extension required).
fn validate_config_path(path: &Path) -> Result<ConfigFormat, ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(ConfigFormat::Json),
        Some("toml") => Ok(ConfigFormat::Toml),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Configuration file must have .json or .toml extension, got .{}",
            ext
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Configuration file must have .json or .toml extension".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let mut original = ServerConfig::default();
        original.gs_bucket = "kernel-images".to_string();
        original.monitor_timeout_secs = None;
        original.readiness.max_attempts = 3;

        save_config_to_file(&original, &config_path).expect("Failed to save config");
        let loaded = load_config_from_file(&config_path).expect("Failed to load config");

        assert_eq!(loaded.gs_bucket, "kernel-images");
        assert_eq!(loaded.monitor_timeout_secs, None);
        assert_eq!(loaded.readiness.max_attempts, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut file = fs::File::create(&config_path).unwrap();
        writeln!(file, "gs_bucket = \"builds\"").unwrap();
        writeln!(file, "gce_zone = \"europe-west1-b\"").unwrap();
        writeln!(file, "[readiness]").unwrap();
        writeln!(file, "max_attempts = 4").unwrap();
        drop(file);

        let loaded = load_config_from_file(&config_path).expect("Failed to load config");
        assert_eq!(loaded.gs_bucket, "builds");
        assert_eq!(loaded.gce_region(), "europe-west1");
        assert_eq!(loaded.readiness.max_attempts, 4);
        assert_eq!(loaded.readiness.initial_delay_ms, 1000);
        assert_eq!(loaded.image_name, "bzImage");
    }

    #[test]
    fn test_invalid_extension_rejected() {
        assert!(matches!(
            load_config_from_file(Path::new("config.yaml")),
            Err(ConfigError::ValidationFailed(_))
        ));
        assert!(matches!(
            load_config_from_file(Path::new("")),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_config_from_file(Path::new("/nonexistent/path/config.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.json");
        fs::write(&config_path, b"{ invalid json }").unwrap();

        let result = load_config_from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::InvalidJson(_))));
    }
}
