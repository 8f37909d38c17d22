use async_trait::async_trait;
pub use wfrec_common::error::BackendError;
use wfrec_common::protocol::{Response, TabCommand, TabId, TabInfo};

/// The browser surface the coordinator drives.
///
/// Implementations own the tabs; the coordinator only ever addresses the
/// currently active one.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The tab the user is looking at, if any.
    async fn active_tab(&self) -> Result<Option<TabInfo>, BackendError>;

    /// Installs page instrumentation and the recorder into the tab's current
    /// document. Repeated calls on the same document are no-ops.
    async fn inject(&self, tab: &TabId) -> Result<(), BackendError>;

    /// Delivers a command to the tab's recorder and waits for its answer, if
    /// the command has one.
    async fn send_to_tab(
        &self,
        tab: &TabId,
        command: TabCommand,
    ) -> Result<Option<Response>, BackendError>;

    /// Navigate the active tab to a URL.
    async fn navigate(&self, _url: &str) -> Result<TabInfo, BackendError> {
        Err(BackendError::NotSupported("navigate".into()))
    }
}
