use super::schema::RecorderConfig;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Names a config file that replaces the default search.
pub const CONFIG_ENV: &str = "WFREC_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from, in order:
    /// 1. the file named by `$WFREC_CONFIG` (it must exist)
    /// 2. ./wfrec.yaml
    /// 3. ~/.wfrec/config.yaml
    /// 4. Default configuration
    pub async fn load_default() -> Result<RecorderConfig, ConfigError> {
        let search = Self::search_paths();
        match resolve(std::env::var_os(CONFIG_ENV), &search) {
            Some(path) => Self::load_from(&path).await,
            None => Ok(RecorderConfig::default()),
        }
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./wfrec.yaml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".wfrec").join("config.yaml"));
        }
        paths
    }

    /// Reads one file. An empty file means all defaults.
    pub async fn load_from(path: &Path) -> Result<RecorderConfig, ConfigError> {
        debug!(path = %path.display(), "Loading configuration");
        let content = tokio::fs::read_to_string(path).await?;
        if content.trim().is_empty() {
            return Ok(RecorderConfig::default());
        }
        let config: RecorderConfig = serde_yaml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }
}

/// Picks the file to load. A non-empty override wins even when the file does
/// not exist; loading it then fails.
fn resolve(override_path: Option<OsString>, search: &[PathBuf]) -> Option<PathBuf> {
    match override_path.filter(|p| !p.is_empty()) {
        Some(path) => Some(PathBuf::from(path)),
        None => search.iter().find(|p| p.exists()).cloned(),
    }
}

fn validate(config: &RecorderConfig) -> Result<(), ConfigError> {
    if config.recording.operation_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "recording.operation_timeout_ms must be positive".into(),
        ));
    }
    if config.export.filename_prefix.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "export.filename_prefix must not be empty".into(),
        ));
    }
    Ok(())
}
