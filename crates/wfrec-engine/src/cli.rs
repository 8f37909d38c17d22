use crate::coordinator::Coordinator;
use std::error::Error;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use wfrec_common::protocol::{Request, Response};

#[derive(Clone, Copy)]
pub struct OutputHandlers {
    pub out: fn(&str),
    pub err: fn(&str),
}

pub struct FileOptions {
    pub stop_on_error: bool,
}

pub struct ReplOptions<'a> {
    pub banner_lines: &'a [&'a str],
    pub prompt: &'a str,
    pub exit_commands: &'a [&'a str],
    pub ctrl_c_message: Option<&'a str>,
}

/// A line of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Request(Request),
    Goto(String),
    Help,
}

pub const HELP: &str = "\
Commands:
  start              begin recording in the active tab
  stop               stop recording and export the workflow
  snapshot           capture the current page source as a step
  status             show recording state and step count
  mutations on|off   toggle DOM mutation recording
  goto <url>         navigate the active tab
  exit               quit";

pub fn parse_command(line: &str) -> Result<CliCommand, String> {
    let mut parts = line.split_whitespace();
    let Some(head) = parts.next() else {
        return Err("empty command".into());
    };
    let rest: Vec<&str> = parts.collect();
    let command = match (head.to_ascii_lowercase().as_str(), rest.as_slice()) {
        ("start", []) => CliCommand::Request(Request::Start),
        ("stop", []) => CliCommand::Request(Request::Stop),
        ("snapshot" | "capture", []) => CliCommand::Request(Request::CapturePageSource),
        ("status", []) => CliCommand::Request(Request::Status),
        ("mutations", [flag]) => match flag.to_ascii_lowercase().as_str() {
            "on" | "true" => CliCommand::Request(Request::SetRecordMutations { enabled: true }),
            "off" | "false" => {
                CliCommand::Request(Request::SetRecordMutations { enabled: false })
            }
            other => return Err(format!("expected 'on' or 'off', got '{}'", other)),
        },
        ("goto", [url]) => CliCommand::Goto((*url).to_string()),
        ("help" | "?", []) => CliCommand::Help,
        ("start" | "stop" | "snapshot" | "capture" | "status" | "help", _) => {
            return Err(format!("'{}' takes no arguments", head));
        }
        ("mutations", _) => return Err("usage: mutations on|off".into()),
        ("goto", _) => return Err("usage: goto <url>".into()),
        _ => return Err(format!("unknown command '{}' (try 'help')", head)),
    };
    Ok(command)
}

pub fn format_response(response: &Response) -> String {
    let mut text = response.status.to_string();
    if let Some(message) = &response.message {
        text.push_str(": ");
        text.push_str(message);
    }
    if let Some(count) = response.step_count {
        text.push_str(&format!(" ({} steps)", count));
    }
    if let Some(enabled) = response.record_mutations_enabled {
        text.push_str(if enabled {
            " [mutations on]"
        } else {
            " [mutations off]"
        });
    }
    text
}

pub async fn execute_line(coordinator: &Coordinator, line: &str) -> Result<String, String> {
    match parse_command(line)? {
        CliCommand::Help => Ok(HELP.to_string()),
        CliCommand::Goto(url) => coordinator
            .navigate(&url)
            .await
            .map(|tab| format!("Navigated to {}", tab.url))
            .map_err(|e| e.to_string()),
        CliCommand::Request(request) => match coordinator.handle(request).await {
            Some(response) if response.is_error() => Err(format_response(&response)),
            Some(response) => Ok(format_response(&response)),
            None => Ok(String::new()),
        },
    }
}

pub async fn run_file(
    coordinator: &Coordinator,
    output: OutputHandlers,
    path: &str,
    options: FileOptions,
) -> Result<(), Box<dyn Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match execute_line(coordinator, trimmed).await {
            Ok(result) => (output.out)(&result),
            Err(err) => {
                (output.err)(&format!("Error executing line '{}': {}", trimmed, err));
                if options.stop_on_error {
                    return Err(io::Error::other(err).into());
                }
            }
        }
    }
    Ok(())
}

enum ReadLineResult {
    Input(String),
    Skip,
    Exit,
    Error(io::Error),
}

fn classify_line(
    result: Result<Option<String>, io::Error>,
    exit_commands: &[&str],
) -> ReadLineResult {
    match result {
        Ok(Some(input)) => {
            let trimmed = input.trim().to_string();
            if trimmed.is_empty() {
                ReadLineResult::Skip
            } else if exit_commands.contains(&trimmed.as_str()) {
                ReadLineResult::Exit
            } else {
                ReadLineResult::Input(trimmed)
            }
        }
        Ok(None) => ReadLineResult::Exit,
        Err(e) => ReadLineResult::Error(e),
    }
}

pub async fn run_repl(
    coordinator: &Coordinator,
    output: OutputHandlers,
    options: ReplOptions<'_>,
) -> Result<(), Box<dyn Error>> {
    for line in options.banner_lines {
        (output.out)(line);
    }

    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();

    loop {
        print!("{}", options.prompt);
        stdout.flush()?;

        let read = tokio::select! {
            line = reader.next_line() => classify_line(line, options.exit_commands),
            _ = tokio::signal::ctrl_c() => {
                if let Some(message) = options.ctrl_c_message {
                    (output.out)(message);
                }
                ReadLineResult::Exit
            }
        };

        match read {
            ReadLineResult::Input(line) => match execute_line(coordinator, &line).await {
                Ok(result) if result.is_empty() => {}
                Ok(result) => (output.out)(&result),
                Err(err) => (output.err)(&format!("Error: {}", err)),
            },
            ReadLineResult::Skip => continue,
            ReadLineResult::Exit => break,
            ReadLineResult::Error(e) => return Err(e.into()),
        }
    }
    Ok(())
}
