use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub store: StoreConfig,
    pub export: ExportConfig,
    pub browser: BrowserConfig,
    pub recording: RecordingConfig,
}

fn app_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".wfrec"))
        .unwrap_or_else(|| PathBuf::from(".wfrec"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: app_dir().join("state.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub directory: PathBuf,
    pub filename_prefix: String,
    pub timestamp_suffix: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            filename_prefix: "workflow-recording".to_string(),
            timestamp_suffix: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub visible: bool,
    pub chrome_bin: Option<String>,
    pub start_url: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            visible: true,
            chrome_bin: None,
            start_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Upper bound for a single injection or tab message.
    pub operation_timeout_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 10_000,
        }
    }
}

impl RecordingConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}
