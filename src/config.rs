use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::database::PostgresConnectionParams;
use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

pub const TOKEN_ENV_VAR: &str = "SCREENSHOT_UPLOADER_API_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Ask the API for a signed URL, then PUT the bytes there.
    SignedUrl,
    /// POST a multipart form to `upload_endpoint`.
    Multipart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub storage_mode: StorageMode,
    pub upload_endpoint: Option<String>,
    pub request_timeout_secs: u64,
    pub call_timeout_secs: Option<u64>,
    pub max_file_size_mb: u64,
    pub log_level: String,
    pub database: Option<PostgresConnectionParams>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3100".to_string(),
            api_token: None,
            storage_mode: StorageMode::SignedUrl,
            upload_endpoint: None,
            request_timeout_secs: 120,
            call_timeout_secs: None,
            max_file_size_mb: 25,
            log_level: "info".to_string(),
            database: None,
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Environment takes precedence over the file for secrets.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            if !token.trim().is_empty() {
                self.api_token = Some(token.trim().to_string());
            }
        }
    }
}

pub fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join("screenshot-uploader");

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

/// Load from `path` (or the default location), writing defaults if missing.
pub fn load_config(path: Option<&Path>) -> AppResult<Config> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };

    let mut config = if config_path.exists() {
        let config_str = fs::read_to_string(&config_path)?;
        serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            Config::default()
        })
    } else {
        let default_config = Config::default();
        save_config_to(&config_path, &default_config)?;
        default_config
    };

    config.apply_env_overrides();
    validate_config(&config)?;
    Ok(config)
}

pub fn save_config_to(config_path: &Path, config: &Config) -> AppResult<()> {
    validate_config(config)?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Create backup of existing config
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

// Reset configuration to defaults
pub fn reset_config(path: Option<&Path>) -> AppResult<Config> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };

    if config_path.exists() {
        let backup_path = config_path.with_extension("json.reset_backup");
        fs::copy(&config_path, &backup_path)?;
        log::info!("Existing config backed up to {}", backup_path.display());
    }

    let default_config = Config::default();
    save_config_to(&config_path, &default_config)?;

    log::info!("Configuration reset to defaults");
    Ok(default_config)
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    InputValidator::validate_api_url(&config.api_base_url)?;

    if config.storage_mode == StorageMode::Multipart {
        match &config.upload_endpoint {
            Some(endpoint) => InputValidator::validate_api_url(endpoint)?,
            None => {
                return Err(AppError::validation(
                    "upload_endpoint",
                    "Required when storage_mode is 'multipart'",
                ))
            }
        }
    }

    if config.request_timeout_secs == 0 {
        return Err(AppError::validation("request_timeout_secs", "Must be greater than 0"));
    }

    if config.call_timeout_secs == Some(0) {
        return Err(AppError::validation("call_timeout_secs", "Must be greater than 0"));
    }

    if config.max_file_size_mb == 0 || config.max_file_size_mb > 100 {
        return Err(AppError::validation("max_file_size_mb", "Must be between 1 and 100"));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_config_rejects_bad_values() {
        let mut config = Config::default();
        config.log_level = "loud".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.storage_mode = StorageMode::Multipart;
        assert!(validate_config(&config).is_err());
        config.upload_endpoint = Some("https://files.example.com/upload".to_string());
        assert!(validate_config(&config).is_ok());

        let mut config = Config::default();
        config.call_timeout_secs = Some(0);
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.api_base_url = "localhost".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_creates_defaults_then_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let loaded = load_config(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(loaded.storage_mode, StorageMode::SignedUrl);

        let mut changed = loaded.clone();
        changed.call_timeout_secs = Some(30);
        save_config_to(&path, &changed).unwrap();
        assert!(path.with_extension("json.bak").exists());

        let reloaded = load_config(Some(&path)).unwrap();
        assert_eq!(reloaded.call_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "api_base_url": "https://app.example.com",
                "database": {
                    "user": "u", "host": "h", "database": "d", "password": "p",
                    "port": 5432, "ssl": "require", "defaultSchema": "public"
                }
            }"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.api_base_url, "https://app.example.com");
        assert_eq!(config.request_timeout_secs, 120);
        assert_eq!(config.database.unwrap().default_schema, "public");
    }

    #[test]
    fn test_unparsable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.api_base_url, Config::default().api_base_url);
    }

    #[test]
    fn test_reset_config_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.max_file_size_mb = 5;
        save_config_to(&path, &config).unwrap();

        let reset = reset_config(Some(&path)).unwrap();
        assert_eq!(reset.max_file_size_mb, 25);
        assert!(path.with_extension("json.reset_backup").exists());
    }
}
