//! The per-document recorder.
//!
//! A [`Recorder`] turns page notifications, native DOM events and mutation
//! batches into [`Step`]s and forwards them through a [`StepSink`]. It never
//! writes the log itself; the coordinator owns appends.

pub mod css_path;
pub mod dom;
pub mod mutation;

use chrono::{SecondsFormat, Utc};
use dom::{Document, NodeId};
use mutation::{DomChange, serialize_mutation};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wfrec_common::protocol::{
    ConsoleErrorPayload, PageNotification, Request, Response, Settings, Status, Step, StepKind,
    TabCommand,
};

pub use css_path::css_path;

const TEXT_INPUT_TYPES: &[&str] = &["text", "email", "password", "search", "tel", "url", "number"];

/// Where a recorder sends the steps it produces.
pub trait StepSink: Send {
    fn submit(&self, step: Step);
}

impl StepSink for mpsc::UnboundedSender<Step> {
    fn submit(&self, step: Step) {
        if self.send(step).is_err() {
            warn!("Step receiver dropped; step discarded");
        }
    }
}

impl StepSink for mpsc::UnboundedSender<Request> {
    fn submit(&self, step: Step) {
        if self.send(Request::LogStep { data: step }).is_err() {
            warn!("Coordinator channel closed; step discarded");
        }
    }
}

/// Occurrences the host observes in a document.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Notification(PageNotification),
    Click {
        target: Option<NodeId>,
    },
    Blur {
        target: Option<NodeId>,
        value: String,
    },
    Change {
        target: Option<NodeId>,
        checked: Option<bool>,
        selected_text: Option<String>,
    },
}

/// An active mutation subscription.
#[derive(Debug, Default)]
struct MutationObserver {
    batches: u64,
}

pub struct Recorder<S> {
    sink: S,
    url: String,
    counter: u64,
    installed: bool,
    observer: Option<MutationObserver>,
}

impl<S: StepSink> Recorder<S> {
    pub fn new(url: impl Into<String>, sink: S) -> Self {
        Self {
            sink,
            url: url.into(),
            counter: 0,
            installed: false,
            observer: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Installs the recorder on its document and emits the `PAGE_LOAD` step.
    /// Returns `false` without side effects when already installed.
    pub fn install(&mut self, doc: &Document) -> bool {
        if self.installed {
            return false;
        }
        self.installed = true;
        self.log(StepKind::PageLoad { title: doc.title() });
        true
    }

    pub fn apply_settings(&mut self, settings: &Settings) {
        self.set_mutation_recording(settings.record_mutations_enabled);
    }

    /// Starts or stops mutation observation. At most one observer exists.
    pub fn set_mutation_recording(&mut self, enabled: bool) {
        match (enabled, self.observer.is_some()) {
            (true, false) => {
                self.observer = Some(MutationObserver::default());
                debug!("Mutation observer is now active.");
            }
            (false, true) => {
                if let Some(observer) = self.observer.take() {
                    debug!(
                        batches = observer.batches,
                        "Mutation observer has been stopped."
                    );
                }
            }
            _ => {}
        }
    }

    pub fn is_observing_mutations(&self) -> bool {
        self.observer.is_some()
    }

    pub fn handle_event(&mut self, doc: &Document, event: PageEvent) {
        if !self.installed {
            return;
        }
        match event {
            PageEvent::Notification(PageNotification::Console(console)) => {
                self.log(StepKind::console(console.level, console.messages));
            }
            PageEvent::Notification(PageNotification::Error(exception)) => {
                self.log(StepKind::ConsoleError(ConsoleErrorPayload::Exception(
                    exception,
                )));
            }
            PageEvent::Click { target } => {
                let target_element = target
                    .filter(|t| doc.is_element(*t))
                    .map(|t| doc.outer_html(t));
                self.log(StepKind::UserActionClick {
                    target_element,
                    css_path: target.and_then(|t| css_path(doc, t)),
                });
            }
            PageEvent::Blur { target, value } => {
                let Some(target) = target.filter(|t| is_text_field(doc, *t)) else {
                    return;
                };
                self.log(StepKind::UserActionInput {
                    css_path: css_path(doc, target),
                    value,
                });
            }
            PageEvent::Change {
                target,
                checked,
                selected_text,
            } => {
                let Some(target) = target else {
                    return;
                };
                let kind = match change_kind(doc, target) {
                    Some(ChangeKind::Toggle) => StepKind::UserActionChange {
                        css_path: css_path(doc, target),
                        checked: Some(checked.unwrap_or(false)),
                        selected_text: None,
                    },
                    Some(ChangeKind::Select) => StepKind::UserActionChange {
                        css_path: css_path(doc, target),
                        checked: None,
                        selected_text: Some(selected_text.unwrap_or_default()),
                    },
                    None => return,
                };
                self.log(kind);
            }
        }
    }

    /// Emits one `DOM_MUTATION` step for a non-empty batch while observing.
    pub fn on_mutations(&mut self, doc: &Document, batch: &[DomChange]) {
        if !self.installed || batch.is_empty() {
            return;
        }
        let Some(observer) = self.observer.as_mut() else {
            return;
        };
        observer.batches += 1;
        let mutations = batch.iter().map(|c| serialize_mutation(doc, c)).collect();
        self.log(StepKind::DomMutation { mutations });
    }

    /// Handles a coordinator command. Only `capturePageSource` answers.
    pub fn handle_command(&mut self, doc: &Document, command: TabCommand) -> Option<Response> {
        match command {
            TabCommand::Initialize { settings } => {
                self.apply_settings(&settings);
                None
            }
            TabCommand::CapturePageSource => {
                let html_snapshot = doc
                    .document_element()
                    .map(|html| doc.outer_html(html))
                    .unwrap_or_default();
                self.log(StepKind::ManualSnapshot {
                    title: doc.title(),
                    html_snapshot,
                });
                Some(Response::new(Status::Captured))
            }
        }
    }

    fn log(&mut self, kind: StepKind) {
        self.counter += 1;
        let step = Step {
            step: self.counter,
            document_step: self.counter,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            url: self.url.clone(),
            kind,
        };
        debug!(step = step.document_step, kind = step.step_type(), "Recorded step");
        self.sink.submit(step);
    }
}

enum ChangeKind {
    Toggle,
    Select,
}

fn input_type(doc: &Document, node: NodeId) -> String {
    doc.attribute(node, "type")
        .unwrap_or("text")
        .trim()
        .to_ascii_lowercase()
}

fn is_text_field(doc: &Document, node: NodeId) -> bool {
    match doc.tag_name(node) {
        Some("textarea") => true,
        Some("input") => {
            let kind = input_type(doc, node);
            kind.is_empty() || TEXT_INPUT_TYPES.contains(&kind.as_str())
        }
        _ => false,
    }
}

fn change_kind(doc: &Document, node: NodeId) -> Option<ChangeKind> {
    match doc.tag_name(node) {
        Some("select") => Some(ChangeKind::Select),
        Some("input") if matches!(input_type(doc, node).as_str(), "checkbox" | "radio") => {
            Some(ChangeKind::Toggle)
        }
        _ => None,
    }
}
