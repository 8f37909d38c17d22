use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a browser host when the coordinator talks to a tab.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("No active tab found.")]
    NoActiveTab,

    #[error("Unknown tab: {0}")]
    UnknownTab(String),

    #[error("Injection failed: {0}")]
    Injection(String),

    #[error("Recorder is not installed in tab {0}")]
    NotInjected(String),

    #[error("Could not reach recorder: {0}")]
    Messaging(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Backend error: {0}")]
    Other(String),
}
