//! Messages the injected event bridge sends through its DevTools binding.

use serde::Deserialize;
use wfrec_common::protocol::PageNotification;
use wfrec_engine::recorder::PageEvent;
use wfrec_engine::recorder::dom::Document;

/// Element-child index path from `document.documentElement`.
pub type ElementPath = Option<Vec<usize>>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BridgeEvent {
    Notification {
        notification: PageNotification,
    },
    Click {
        #[serde(default)]
        path: ElementPath,
    },
    Blur {
        #[serde(default)]
        path: ElementPath,
        #[serde(default)]
        value: String,
    },
    Change {
        #[serde(default)]
        path: ElementPath,
        #[serde(default)]
        checked: Option<bool>,
        #[serde(default)]
        selected_text: Option<String>,
    },
}

impl BridgeEvent {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Resolves element paths against the mirrored document.
    pub fn into_page_event(self, doc: &Document) -> PageEvent {
        let resolve = |path: ElementPath| path.and_then(|p| doc.resolve_path(&p));
        match self {
            BridgeEvent::Notification { notification } => PageEvent::Notification(notification),
            BridgeEvent::Click { path } => PageEvent::Click {
                target: resolve(path),
            },
            BridgeEvent::Blur { path, value } => PageEvent::Blur {
                target: resolve(path),
                value,
            },
            BridgeEvent::Change {
                path,
                checked,
                selected_text,
            } => PageEvent::Change {
                target: resolve(path),
                checked,
                selected_text,
            },
        }
    }
}
