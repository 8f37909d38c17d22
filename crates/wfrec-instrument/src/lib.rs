//! The two script units injected into every recorded document.
//!
//! [`PAGE_INSTRUMENTATION_JS`] runs in the page's main world and patches the
//! console and `window.onerror`; it reports through a namespaced `CustomEvent`.
//! [`EVENT_BRIDGE_JS`] listens on that channel plus native `click`, `blur` and
//! `change` events and forwards them to the host through a CDP binding.

pub const PAGE_INSTRUMENTATION_JS: &str = include_str!("instrument.js");
pub const EVENT_BRIDGE_JS: &str = include_str!("bridge.js");

pub const DEFAULT_CHANNEL: &str = "__wfrec_event__";
pub const DEFAULT_BINDING: &str = "__wfrecEmit";

const CHANNEL_PLACEHOLDER: &str = "__WFREC_CHANNEL__";
const BINDING_PLACEHOLDER: &str = "__WFREC_BINDING__";

/// Names shared by the injected units and the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub channel: String,
    pub binding: String,
}

impl Default for Injection {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            binding: DEFAULT_BINDING.to_string(),
        }
    }
}

impl Injection {
    pub fn page_script(&self) -> String {
        PAGE_INSTRUMENTATION_JS.replace(CHANNEL_PLACEHOLDER, &self.channel)
    }

    pub fn bridge_script(&self) -> String {
        EVENT_BRIDGE_JS
            .replace(CHANNEL_PLACEHOLDER, &self.channel)
            .replace(BINDING_PLACEHOLDER, &self.binding)
    }
}
