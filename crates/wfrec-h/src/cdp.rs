use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use wfrec_common::error::BackendError;

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub visible: bool,
    /// Falls back to `CHROME_BIN`, then chromiumoxide's own lookup.
    pub chrome_bin: Option<String>,
}

pub struct CdpClient {
    pub browser: Browser,
    pub handler_task: JoinHandle<()>,
    pub page: Page,
    user_data_dir: Option<PathBuf>,
    cleanup_user_data_dir: bool,
}

impl CdpClient {
    pub async fn launch(options: &LaunchOptions) -> Result<Self, BackendError> {
        let mut config_builder = BrowserConfig::builder().no_sandbox();
        let (user_data_dir, cleanup_user_data_dir) = resolve_user_data_dir()?;
        config_builder = config_builder.user_data_dir(&user_data_dir);

        if options.visible {
            tracing::info!("Launching browser in visible mode");
            config_builder = config_builder.with_head();
        } else {
            tracing::info!("Launching browser in headless mode");
        }

        let chrome_bin = options
            .chrome_bin
            .clone()
            .or_else(|| std::env::var("CHROME_BIN").ok());
        if let Some(chrome_bin) = chrome_bin {
            tracing::info!("Using custom Chrome binary: {}", chrome_bin);
            config_builder = config_builder.chrome_executable(chrome_bin);
        }

        let config = config_builder
            .build()
            .map_err(|e| BackendError::Other(format!("Failed to build browser config: {}", e)))?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BackendError::Other(format!("Failed to launch browser: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if let Err(e) = h {
                    tracing::error!("Browser handler error (ignoring): {}", e);
                }
            }
            tracing::info!("Browser handler task ended");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BackendError::Other(format!("Failed to create page: {}", e)))?;

        let mut console_events = page
            .event_listener::<chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled>()
            .await
            .map_err(|e| BackendError::Other(format!("Failed to subscribe to console events: {}", e)))?;

        tokio::spawn(async move {
            while let Some(event) = console_events.next().await {
                let args: Vec<String> = event
                    .args
                    .iter()
                    .map(|arg| {
                        arg.description
                            .clone()
                            .or_else(|| arg.value.as_ref().map(|v| v.to_string()))
                            .unwrap_or_else(|| "unknown".to_string())
                    })
                    .collect();
                tracing::debug!("Browser Console [{:?}]: {}", event.r#type, args.join(" "));
            }
        });

        Ok(Self {
            browser,
            handler_task,
            page,
            user_data_dir: Some(user_data_dir),
            cleanup_user_data_dir,
        })
    }

    pub async fn close(mut self) -> Result<(), BackendError> {
        self.browser
            .close()
            .await
            .map_err(|e| BackendError::Other(format!("Error closing browser: {}", e)))?;
        self.handler_task
            .await
            .map_err(|e| BackendError::Other(format!("Error awaiting handler: {}", e)))?;

        if self.cleanup_user_data_dir {
            if let Some(dir) = &self.user_data_dir {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    tracing::debug!("Failed to clean up user-data-dir {}: {}", dir.display(), e);
                }
            }
        }

        Ok(())
    }
}

fn resolve_user_data_dir() -> Result<(PathBuf, bool), BackendError> {
    let io_error = |e: std::io::Error| BackendError::Other(format!("User data dir: {}", e));

    if let Ok(dir) = std::env::var("WFREC_USER_DATA_DIR") {
        let path = PathBuf::from(dir);
        std::fs::create_dir_all(&path).map_err(io_error)?;
        tracing::info!(
            "Using user data dir from WFREC_USER_DATA_DIR: {}",
            path.display()
        );
        return Ok((path, false));
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BackendError::Other(format!("System clock error: {}", e)))?
        .as_nanos();
    let unique = format!("wfrec-chromium-profile-{}-{}", std::process::id(), nanos);
    let path = std::env::temp_dir().join(unique);
    std::fs::create_dir_all(&path).map_err(io_error)?;
    tracing::info!("Using isolated user data dir: {}", path.display());
    Ok((path, true))
}
