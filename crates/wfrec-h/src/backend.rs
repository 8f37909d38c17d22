use crate::cdp::{CdpClient, LaunchOptions};
use crate::inject::{enable_dom, install_binding};
use crate::tab::{TabControl, TabStreams, TabTask, page_info};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;
use wfrec_common::protocol::{Request, Response, TabCommand, TabId, TabInfo};
use wfrec_engine::backend::{Backend, BackendError};
use wfrec_engine::store::StoreChange;
use wfrec_instrument::Injection;

/// Schemes the browser never lets extensions script.
const RESTRICTED_SCHEMES: &[&str] = &["chrome:", "chrome-extension:", "devtools:", "edge:"];

/// Where a host delivers what it observes.
pub struct HostChannels {
    /// Steps from the recorder, as `logStep` requests.
    pub requests: mpsc::UnboundedSender<Request>,
    /// Top-level page loads.
    pub navigations: mpsc::UnboundedSender<TabInfo>,
    /// Store notifications the recorder follows.
    pub store_changes: broadcast::Receiver<StoreChange>,
}

/// A single Chromium tab driven over the DevTools protocol.
pub struct HeadlessBackend {
    client: CdpClient,
    tab: TabId,
    control: mpsc::UnboundedSender<TabControl>,
    task: JoinHandle<()>,
}

impl HeadlessBackend {
    pub async fn launch(
        options: &LaunchOptions,
        channels: HostChannels,
    ) -> Result<Self, BackendError> {
        info!("Launching Headless Backend (Chromium)...");
        let client = CdpClient::launch(options).await?;
        let page = client.page.clone();
        let tab = TabId(page.target_id().as_ref().to_string());
        let injection = Injection::default();

        enable_dom(&page).await?;
        install_binding(&page, &injection).await?;
        let streams = TabStreams::subscribe(&page).await?;

        let (control, control_rx) = mpsc::unbounded_channel();
        let task = TabTask::new(
            page,
            tab.clone(),
            injection,
            channels.requests,
            channels.navigations,
        );
        let task = tokio::spawn(task.run(streams, control_rx, channels.store_changes));

        Ok(Self {
            client,
            tab,
            control,
            task,
        })
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab
    }

    pub fn page(&self) -> &chromiumoxide::Page {
        &self.client.page
    }

    pub async fn close(self) -> Result<(), BackendError> {
        drop(self.control);
        self.task.abort();
        self.client.close().await
    }

    fn check_tab(&self, tab: &TabId) -> Result<(), BackendError> {
        if *tab == self.tab {
            Ok(())
        } else {
            Err(BackendError::UnknownTab(tab.to_string()))
        }
    }

    async fn call<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<Result<T, BackendError>>) -> TabControl,
    ) -> Result<T, BackendError> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(message(reply))
            .map_err(|_| BackendError::ConnectionLost)?;
        rx.await.map_err(|_| BackendError::ConnectionLost)?
    }
}

#[async_trait]
impl Backend for HeadlessBackend {
    async fn active_tab(&self) -> Result<Option<TabInfo>, BackendError> {
        Ok(Some(page_info(&self.client.page, &self.tab).await?))
    }

    async fn inject(&self, tab: &TabId) -> Result<(), BackendError> {
        self.check_tab(tab)?;
        let url = page_info(&self.client.page, tab).await?.url;
        if let Some(scheme) = RESTRICTED_SCHEMES.iter().find(|s| url.starts_with(*s)) {
            return Err(BackendError::Injection(format!(
                "Cannot access a {}// URL",
                scheme
            )));
        }
        self.call(TabControl::Install).await
    }

    async fn send_to_tab(
        &self,
        tab: &TabId,
        command: TabCommand,
    ) -> Result<Option<Response>, BackendError> {
        self.check_tab(tab)?;
        self.call(|reply| TabControl::Command(command, reply)).await
    }

    async fn navigate(&self, url: &str) -> Result<TabInfo, BackendError> {
        info!("Navigating to: {}", url);
        self.client
            .page
            .goto(url)
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?;
        page_info(&self.client.page, &self.tab).await
    }
}
