use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Steps
// ============================================================================

/// One recorded occurrence in a session.
///
/// The payload is flattened into the step object and discriminated by `type`,
/// so a click serializes as
/// `{"step":2,"documentStep":2,"timestamp":"...","url":"...","type":"USER_ACTION_CLICK","cssPath":"#go",...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Session-wide sequence number, assigned when the step is appended to the log.
    pub step: u64,
    /// Position of the step within the document that produced it.
    #[serde(default)]
    pub document_step: u64,
    pub timestamp: String,
    pub url: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn step_type(&self) -> &'static str {
        self.kind.step_type()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum StepKind {
    PageLoad {
        title: String,
    },
    UserActionClick {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_element: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        css_path: Option<String>,
    },
    UserActionInput {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        css_path: Option<String>,
        value: String,
    },
    UserActionChange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        css_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checked: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_text: Option<String>,
    },
    DomMutation {
        mutations: Vec<MutationRecord>,
    },
    ConsoleLog {
        messages: Vec<String>,
    },
    ConsoleWarn {
        messages: Vec<String>,
    },
    ConsoleInfo {
        messages: Vec<String>,
    },
    ConsoleError(ConsoleErrorPayload),
    ManualSnapshot {
        title: String,
        html_snapshot: String,
    },
}

impl StepKind {
    pub fn step_type(&self) -> &'static str {
        match self {
            StepKind::PageLoad { .. } => "PAGE_LOAD",
            StepKind::UserActionClick { .. } => "USER_ACTION_CLICK",
            StepKind::UserActionInput { .. } => "USER_ACTION_INPUT",
            StepKind::UserActionChange { .. } => "USER_ACTION_CHANGE",
            StepKind::DomMutation { .. } => "DOM_MUTATION",
            StepKind::ConsoleLog { .. } => "CONSOLE_LOG",
            StepKind::ConsoleWarn { .. } => "CONSOLE_WARN",
            StepKind::ConsoleInfo { .. } => "CONSOLE_INFO",
            StepKind::ConsoleError(_) => "CONSOLE_ERROR",
            StepKind::ManualSnapshot { .. } => "MANUAL_SNAPSHOT",
        }
    }

    /// Builds the console step matching a page console call.
    pub fn console(level: ConsoleLevel, messages: Vec<String>) -> Self {
        match level {
            ConsoleLevel::Log => StepKind::ConsoleLog { messages },
            ConsoleLevel::Warn => StepKind::ConsoleWarn { messages },
            ConsoleLevel::Info => StepKind::ConsoleInfo { messages },
            ConsoleLevel::Error => StepKind::ConsoleError(ConsoleErrorPayload::Messages { messages }),
        }
    }
}

/// `CONSOLE_ERROR` carries either `console.error(...)` output or an uncaught exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConsoleErrorPayload {
    Exception(UncaughtException),
    Messages { messages: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncaughtException {
    pub error_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    #[serde(default)]
    pub stack: String,
}

// ============================================================================
// DOM mutations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    ChildList,
    Attributes,
}

/// A serialized mutation record. `target` is the element path of the mutated
/// node at serialization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    #[serde(rename = "type")]
    pub kind: MutationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_nodes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_nodes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// The exported recording, written once per stop with a non-empty log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub workflow: Vec<Step>,
}

// ============================================================================
// Page instrumentation notifications
// ============================================================================

/// Payload of the namespaced custom event the page instrumentation dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageNotification {
    Console(ConsoleNotification),
    Error(UncaughtException),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleNotification {
    pub level: ConsoleLevel,
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsoleLevel {
    Log,
    Warn,
    Info,
    Error,
}

// ============================================================================
// Messages
// ============================================================================

/// Requests handled by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Request {
    Start,
    Stop,
    LogStep { data: Step },
    CapturePageSource,
    SetRecordMutations { enabled: bool },
    Status,
}

/// Commands the coordinator sends to a tab's recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum TabCommand {
    Initialize { settings: Settings },
    CapturePageSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub record_mutations_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "recording")]
    Recording,
    #[serde(rename = "already recording")]
    AlreadyRecording,
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "not recording")]
    NotRecording,
    #[serde(rename = "captured")]
    Captured,
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Recording => "recording",
            Status::AlreadyRecording => "already recording",
            Status::Stopped => "stopped",
            Status::NotRecording => "not recording",
            Status::Captured => "captured",
            Status::Idle => "idle",
            Status::Ok => "ok",
            Status::Error => "error",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_mutations_enabled: Option<bool>,
}

impl Response {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            message: None,
            step_count: None,
            record_mutations_enabled: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(Status::Error)
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

// ============================================================================
// Tabs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(pub String);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TabId {
    fn from(value: &str) -> Self {
        TabId(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
    #[serde(default)]
    pub title: String,
}
