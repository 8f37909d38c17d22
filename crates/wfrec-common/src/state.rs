use crate::protocol::{Settings, Step};
use serde::{Deserialize, Serialize};

/// Everything the recorder persists between coordinator restarts.
///
/// Missing keys deserialize to their falsy/empty defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    pub is_recording: bool,
    pub recorded_steps: Vec<Step>,
    pub record_mutations_enabled: bool,
}

impl SessionState {
    pub fn settings(&self) -> Settings {
        Settings {
            record_mutations_enabled: self.record_mutations_enabled,
        }
    }

    /// Clears the session while keeping user preferences.
    pub fn reset_session(&mut self) {
        self.is_recording = false;
        self.recorded_steps.clear();
    }
}
