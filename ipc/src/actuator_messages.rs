//! Line-delimited JSON protocol spoken with the actuator subprocess.
//!
//! Commands go to the actuator's stdin, one JSON object per line, tagged by
//! `cmd`. Events come back on its stdout, tagged by `type`. Several events
//! arrive asynchronously relative to the command that provoked them.

use serde::{Deserialize, Serialize};

/// A command written to the actuator's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActuatorCommand {
    SetClipboard {
        data: String,
    },
    GetClipboard,
    SaveClipboard,
    RestoreClipboard,
    SaveMouse,
    RestoreMouse,
    ClickLoop {
        x: i32,
        y: i32,
        /// Milliseconds between clicks.
        interval: u64,
        /// Milliseconds before the loop stops on its own.
        #[serde(rename = "maxDuration")]
        max_duration: u64,
    },
    StopClicking,
    SetStatus {
        message: String,
    },
    Ping,
}

/// An event read from the actuator's stdout.
///
/// The actuator also emits informational confirmations (`clipboard_saved`,
/// `mouse_restored`, ...) that the coordinator does not act on; they all
/// collapse into [`ActuatorEvent::Info`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActuatorEvent {
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    ClipboardContent {
        #[serde(default)]
        data: String,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    ClickLoopComplete {
        #[serde(default)]
        data: Option<String>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Error {
        error: String,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(other)]
    Info,
}

impl ActuatorCommand {
    /// Wire tag of the command, for logging without dumping payloads.
    pub fn name(&self) -> &'static str {
        match self {
            ActuatorCommand::SetClipboard { .. } => "SET_CLIPBOARD",
            ActuatorCommand::GetClipboard => "GET_CLIPBOARD",
            ActuatorCommand::SaveClipboard => "SAVE_CLIPBOARD",
            ActuatorCommand::RestoreClipboard => "RESTORE_CLIPBOARD",
            ActuatorCommand::SaveMouse => "SAVE_MOUSE",
            ActuatorCommand::RestoreMouse => "RESTORE_MOUSE",
            ActuatorCommand::ClickLoop { .. } => "CLICK_LOOP",
            ActuatorCommand::StopClicking => "STOP_CLICKING",
            ActuatorCommand::SetStatus { .. } => "SET_STATUS",
            ActuatorCommand::Ping => "PING",
        }
    }
}

/// Serializes a command into one protocol line, newline included.
pub fn command_line(command: &ActuatorCommand) -> serde_json::Result<String> {
    Ok(format!("{}\n", serde_json::to_string(command)?))
}

/// Parses one stdout line into an event.
pub fn parse_event(line: &str) -> serde_json::Result<ActuatorEvent> {
    serde_json::from_str(line.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_the_wire_tags() {
        let line = command_line(&ActuatorCommand::SetClipboard {
            data: "payload".into(),
        })
        .unwrap();
        assert_eq!(line, "{\"cmd\":\"SET_CLIPBOARD\",\"data\":\"payload\"}\n");

        let line = command_line(&ActuatorCommand::ClickLoop {
            x: 500,
            y: 400,
            interval: 100,
            max_duration: 2000,
        })
        .unwrap();
        assert!(line.contains("\"cmd\":\"CLICK_LOOP\""));
        assert!(line.contains("\"maxDuration\":2000"));
    }

    #[test]
    fn events_parse_from_agent_output() {
        let event = parse_event(
            "{\"type\":\"clipboard_content\",\"data\":\"hello\",\"timestamp\":1718000000000}",
        )
        .unwrap();
        assert_eq!(
            event,
            ActuatorEvent::ClipboardContent {
                data: "hello".into(),
                timestamp: Some(1_718_000_000_000),
            }
        );

        assert_eq!(
            parse_event("{\"type\":\"pong\",\"timestamp\":1}").unwrap(),
            ActuatorEvent::Pong { timestamp: Some(1) }
        );
    }

    #[test]
    fn unrecognized_events_collapse_to_info() {
        let event = parse_event("{\"type\":\"clipboard_saved\",\"data\":\"12 chars\"}").unwrap();
        assert_eq!(event, ActuatorEvent::Info);
    }
}
