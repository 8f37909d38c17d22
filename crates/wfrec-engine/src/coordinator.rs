//! Recording lifecycle.
//!
//! The coordinator holds no recording state of its own: every operation goes
//! through the [`Journal`], which re-reads the persistent store. Dropping a
//! coordinator and building a new one over the same store resumes the session.

use crate::backend::{Backend, BackendError};
use crate::export::Exporter;
use crate::journal::{Begin, Journal};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use wfrec_common::protocol::{
    Request, Response, Settings, Status, Step, TabCommand, TabId, TabInfo,
};

pub struct Coordinator {
    backend: Arc<dyn Backend>,
    journal: Journal,
    exporter: Exporter,
    timeout: Duration,
}

impl Coordinator {
    pub fn new(
        backend: Arc<dyn Backend>,
        journal: Journal,
        exporter: Exporter,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            journal,
            exporter,
            timeout,
        }
    }

    /// Dispatches a request. `logStep` has no response.
    pub async fn handle(&self, request: Request) -> Option<Response> {
        match request {
            Request::Start => Some(self.start().await),
            Request::Stop => Some(self.stop().await),
            Request::LogStep { data } => {
                self.log_step(data);
                None
            }
            Request::CapturePageSource => Some(self.capture_page_source().await),
            Request::SetRecordMutations { enabled } => {
                Some(self.set_record_mutations(enabled).await)
            }
            Request::Status => Some(self.status().await),
        }
    }

    /// Routes recorder requests and navigation notifications until both
    /// channels close.
    pub async fn serve(
        &self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut navigations: mpsc::UnboundedReceiver<TabInfo>,
    ) {
        let mut requests_open = true;
        let mut navigations_open = true;
        while requests_open || navigations_open {
            tokio::select! {
                request = requests.recv(), if requests_open => match request {
                    Some(request) => {
                        if let Some(response) = self.handle(request).await {
                            debug!(status = %response.status, "Request handled");
                        }
                    }
                    None => requests_open = false,
                },
                tab = navigations.recv(), if navigations_open => match tab {
                    Some(tab) => {
                        self.on_navigation(&tab).await;
                    }
                    None => navigations_open = false,
                },
            }
        }
    }

    pub async fn start(&self) -> Response {
        let tab = match self.bounded(self.backend.active_tab()).await {
            Ok(Some(tab)) => tab,
            Ok(None) => return Response::error(BackendError::NoActiveTab.to_string()),
            Err(e) => {
                error!("Failed to query active tab: {}", e);
                return Response::error(e.to_string());
            }
        };

        let settings = match self.journal.begin().await {
            Ok(Begin::AlreadyRecording) => return Response::new(Status::AlreadyRecording),
            Ok(Begin::Started(settings)) => settings,
            Err(e) => {
                error!("Failed to start recording: {}", e);
                return Response::error(e.to_string());
            }
        };

        match self.install(&tab.id, settings).await {
            Ok(()) => {
                info!("Content script injected.");
                Response::new(Status::Recording)
            }
            Err(e) => {
                error!("Failed to inject script: {}", e);
                if let Err(rollback) = self.journal.rollback().await {
                    error!("Failed to roll back recording state: {}", rollback);
                }
                Response::error(e.to_string())
            }
        }
    }

    pub async fn stop(&self) -> Response {
        let steps = match self.journal.finish().await {
            Ok(None) => return Response::new(Status::NotRecording),
            Ok(Some(steps)) => steps,
            Err(e) => {
                error!("Failed to stop recording: {}", e);
                return Response::error(e.to_string());
            }
        };

        if let Err(e) = self.exporter.export(steps).await {
            error!("Download failed: {}", e);
        }
        info!("Recording stopped and state cleared.");
        Response::new(Status::Stopped)
    }

    /// Queues a step. It is kept only if recording is still active when the
    /// journal reaches it.
    pub fn log_step(&self, step: Step) {
        if let Err(e) = self.journal.append(step) {
            error!("Failed to queue step: {}", e);
        }
    }

    pub async fn capture_page_source(&self) -> Response {
        let result = async {
            let tab = self
                .bounded(self.backend.active_tab())
                .await?
                .ok_or(BackendError::NoActiveTab)?;
            self.bounded(
                self.backend
                    .send_to_tab(&tab.id, TabCommand::CapturePageSource),
            )
            .await?
            .ok_or_else(|| BackendError::Messaging("recorder did not respond".into()))
        }
        .await;

        match result {
            Ok(response) => response,
            Err(e) => {
                error!("Could not send message to capture source: {}", e);
                Response::error(e.to_string())
            }
        }
    }

    pub async fn set_record_mutations(&self, enabled: bool) -> Response {
        match self.journal.set_record_mutations(enabled).await {
            Ok(()) => Response {
                record_mutations_enabled: Some(enabled),
                ..Response::new(Status::Ok)
            },
            Err(e) => Response::error(e.to_string()),
        }
    }

    pub async fn status(&self) -> Response {
        match self.journal.snapshot().await {
            Ok(state) => Response {
                step_count: Some(state.recorded_steps.len()),
                record_mutations_enabled: Some(state.record_mutations_enabled),
                ..Response::new(if state.is_recording {
                    Status::Recording
                } else {
                    Status::Idle
                })
            },
            Err(e) => Response::error(e.to_string()),
        }
    }

    /// Points the active tab at `url`. Re-injection, if recording, follows
    /// from the navigation notification once the page loads.
    pub async fn navigate(&self, url: &str) -> Result<TabInfo, BackendError> {
        self.bounded(self.backend.navigate(url)).await
    }

    /// Re-injects into a tab whose new top-level document finished loading.
    /// Returns whether the recorder was (re)installed; failures are logged.
    pub async fn on_navigation(&self, tab: &TabInfo) -> bool {
        if !is_recordable_url(&tab.url) {
            return false;
        }
        let settings = match self.journal.snapshot().await {
            Ok(state) if state.is_recording => state.settings(),
            Ok(_) => return false,
            Err(e) => {
                warn!("Failed to read recording state on navigation: {}", e);
                return false;
            }
        };
        match self.install(&tab.id, settings).await {
            Ok(()) => {
                debug!(url = %tab.url, "Re-injected after navigation");
                true
            }
            Err(e) => {
                error!("Failed to inject script on navigation: {}", e);
                false
            }
        }
    }

    async fn install(&self, tab: &TabId, settings: Settings) -> Result<(), BackendError> {
        self.bounded(self.backend.inject(tab)).await?;
        self.bounded(
            self.backend
                .send_to_tab(tab, TabCommand::Initialize { settings }),
        )
        .await?;
        Ok(())
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))?
    }
}

/// Only http(s) documents are recorded.
pub fn is_recordable_url(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}
