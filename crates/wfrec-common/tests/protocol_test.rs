//! Wire-format tests for steps, notifications and coordinator messages.

use serde_json::json;
use wfrec_common::protocol::{
    ConsoleErrorPayload, ConsoleLevel, ExportArtifact, MutationKind, MutationRecord,
    PageNotification, Request, Response, Settings, Status, Step, StepKind, TabCommand,
};

fn click_step() -> Step {
    Step {
        step: 2,
        document_step: 2,
        timestamp: "2024-05-01T10:00:00.000Z".into(),
        url: "https://example.com/".into(),
        kind: StepKind::UserActionClick {
            target_element: Some("<button id=\"go\">Go</button>".into()),
            css_path: Some("#go".into()),
        },
    }
}

#[test]
fn test_step_payload_is_flattened_under_type_tag() {
    let value = serde_json::to_value(click_step()).unwrap();
    assert_eq!(
        value,
        json!({
            "step": 2,
            "documentStep": 2,
            "timestamp": "2024-05-01T10:00:00.000Z",
            "url": "https://example.com/",
            "type": "USER_ACTION_CLICK",
            "targetElement": "<button id=\"go\">Go</button>",
            "cssPath": "#go"
        })
    );
}

#[test]
fn test_step_deserializes_from_flat_object() {
    let step: Step = serde_json::from_value(json!({
        "step": 1,
        "timestamp": "2024-05-01T10:00:00.000Z",
        "url": "https://example.com/",
        "type": "PAGE_LOAD",
        "title": "Example"
    }))
    .unwrap();

    assert_eq!(step.document_step, 0);
    assert_eq!(step.step_type(), "PAGE_LOAD");
    assert_eq!(
        step.kind,
        StepKind::PageLoad {
            title: "Example".into()
        }
    );
}

#[test]
fn test_console_error_accepts_messages_and_exceptions() {
    let from_console: StepKind = serde_json::from_value(json!({
        "type": "CONSOLE_ERROR",
        "messages": ["boom"]
    }))
    .unwrap();
    assert!(matches!(
        from_console,
        StepKind::ConsoleError(ConsoleErrorPayload::Messages { ref messages }) if messages == &["boom"]
    ));

    let from_handler: StepKind = serde_json::from_value(json!({
        "type": "CONSOLE_ERROR",
        "errorType": "Uncaught Exception",
        "message": "x is not defined",
        "source": "https://example.com/app.js",
        "lineno": 12,
        "colno": 4,
        "stack": "ReferenceError: x is not defined"
    }))
    .unwrap();
    match from_handler {
        StepKind::ConsoleError(ConsoleErrorPayload::Exception(exception)) => {
            assert_eq!(exception.message, "x is not defined");
            assert_eq!(exception.lineno, Some(12));
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[test]
fn test_console_levels_map_to_step_types() {
    let kinds = [
        (ConsoleLevel::Log, "CONSOLE_LOG"),
        (ConsoleLevel::Warn, "CONSOLE_WARN"),
        (ConsoleLevel::Info, "CONSOLE_INFO"),
        (ConsoleLevel::Error, "CONSOLE_ERROR"),
    ];
    for (level, expected) in kinds {
        let kind = StepKind::console(level, vec!["x".into()]);
        assert_eq!(kind.step_type(), expected);
        assert_eq!(serde_json::to_value(&kind).unwrap()["type"], expected);
    }
}

#[test]
fn test_mutation_record_omits_absent_fields() {
    let record = MutationRecord {
        kind: MutationKind::Attributes,
        added_nodes: None,
        removed_nodes: None,
        attribute_name: Some("class".into()),
        old_value: None,
        new_value: Some("open".into()),
        target: Some("#menu".into()),
    };
    assert_eq!(
        serde_json::to_value(&record).unwrap(),
        json!({
            "type": "attributes",
            "attributeName": "class",
            "newValue": "open",
            "target": "#menu"
        })
    );
}

#[test]
fn test_page_notification_parses_custom_event_detail() {
    let console: PageNotification = serde_json::from_value(json!({
        "type": "CONSOLE",
        "data": { "level": "WARN", "messages": ["x", "{\"a\":1}"] }
    }))
    .unwrap();
    match console {
        PageNotification::Console(notification) => {
            assert_eq!(notification.level, ConsoleLevel::Warn);
            assert_eq!(notification.messages, vec!["x", "{\"a\":1}"]);
        }
        other => panic!("unexpected notification: {:?}", other),
    }

    let error: PageNotification = serde_json::from_value(json!({
        "type": "ERROR",
        "data": {
            "errorType": "Uncaught Exception",
            "message": "boom",
            "stack": "No stack available."
        }
    }))
    .unwrap();
    assert!(matches!(error, PageNotification::Error(ref e) if e.stack == "No stack available."));
}

#[test]
fn test_requests_use_command_tag() {
    let request: Request = serde_json::from_value(json!({ "command": "start" })).unwrap();
    assert_eq!(request, Request::Start);

    let request: Request =
        serde_json::from_value(json!({ "command": "capturePageSource" })).unwrap();
    assert_eq!(request, Request::CapturePageSource);

    let request = Request::LogStep { data: click_step() };
    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["command"], "logStep");
    assert_eq!(value["data"]["cssPath"], "#go");
}

#[test]
fn test_initialize_carries_settings() {
    let command = TabCommand::Initialize {
        settings: Settings {
            record_mutations_enabled: true,
        },
    };
    assert_eq!(
        serde_json::to_value(&command).unwrap(),
        json!({
            "command": "initialize",
            "settings": { "recordMutationsEnabled": true }
        })
    );
}

#[test]
fn test_response_status_strings() {
    assert_eq!(
        serde_json::to_value(Response::new(Status::AlreadyRecording)).unwrap(),
        json!({ "status": "already recording" })
    );
    assert_eq!(
        serde_json::to_value(Response::new(Status::NotRecording)).unwrap(),
        json!({ "status": "not recording" })
    );
    assert_eq!(
        serde_json::to_value(Response::error("No active tab found.")).unwrap(),
        json!({ "status": "error", "message": "No active tab found." })
    );
    assert_eq!(Status::AlreadyRecording.to_string(), "already recording");
}

#[test]
fn test_export_artifact_shape() {
    let artifact = ExportArtifact {
        workflow: vec![click_step()],
    };
    let value = serde_json::to_value(&artifact).unwrap();
    assert_eq!(value["workflow"][0]["type"], "USER_ACTION_CLICK");
}
