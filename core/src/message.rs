//! The clipboard wire protocol.
//!
//! The clipboard is a one-slot mailbox shared by both sides, so every
//! message is serialized to JSON and terminated by a sentinel string unique
//! to its kind. The receiver locates the end of a message embedded in
//! otherwise-arbitrary clipboard content by scanning for the sentinel; a
//! missing sentinel means "not yet fully published", never an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{RelayError, RelayResult};

/// Terminates a Request or Calibration message.
pub const REQUEST_SENTINEL: &str = "|||CCC_END|||";
/// Terminates a Response message.
pub const RESPONSE_SENTINEL: &str = "|||BROWSER_END|||";
/// Terminates a Progress message.
pub const PROGRESS_SENTINEL: &str = "|||BROWSER_PROGRESS|||";
/// An Ack is the bare sentinel itself, with the request id embedded.
pub const ACK_PREFIX: &str = "|||BROWSER_ACK:";
pub const ACK_SUFFIX: &str = "|||";

/// Every sentinel fragment that must not appear inside a message body.
const SENTINELS: [&str; 4] = [
    REQUEST_SENTINEL,
    RESPONSE_SENTINEL,
    PROGRESS_SENTINEL,
    ACK_PREFIX,
];

/// Request actions understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Chat,
    Continue,
    Cancel,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Chat => "chat",
            Action::Continue => "continue",
            Action::Cancel => "cancel",
        }
    }

    /// Parses a wire action string; unrecognized actions are surfaced to the
    /// caller so the bridge can answer with a descriptive error response.
    pub fn parse(s: &str) -> RelayResult<Self> {
        match s {
            "chat" => Ok(Action::Chat),
            "continue" => Ok(Action::Continue),
            "cancel" => Ok(Action::Cancel),
            other => Err(RelayError::UnknownAction(other.to_string())),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal and streaming statuses carried by Progress/Response messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    Cancelled,
    Streaming,
}

/// Streaming delta payload: the full text produced so far plus the chunk
/// added since the previous Progress message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub accumulated: String,
    pub chunk: String,
}

/// Payload of a `chat` or `continue` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Payload of a successful chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    pub chat_id: String,
    pub message_id: String,
    pub content: String,
}

/// Payload of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// One wire message. Internally tagged so the JSON `type` field matches the
/// clipboard protocol spoken by the UI side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "CCC_REQUEST")]
    Request {
        id: String,
        timestamp: i64,
        action: String,
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },
    #[serde(rename = "CCC_CALIBRATION")]
    Calibration {
        id: String,
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },
    /// Never serialized as JSON; its wire form is the bare ack sentinel.
    #[serde(rename = "BROWSER_ACK")]
    Ack { id: String, timestamp: i64 },
    #[serde(rename = "BROWSER_PROGRESS")]
    Progress {
        id: String,
        timestamp: i64,
        status: Status,
        payload: ProgressPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },
    #[serde(rename = "BROWSER_RESPONSE")]
    Response {
        id: String,
        timestamp: i64,
        status: Status,
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },
}

/// Current wall-clock time in milliseconds, as carried on the wire.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Message {
    pub fn request(action: Action, payload: Value) -> Self {
        Message::Request {
            id: Uuid::new_v4().to_string(),
            timestamp: now_millis(),
            action: action.as_str().to_string(),
            payload,
            checksum: None,
        }
    }

    pub fn calibration() -> Self {
        Message::Calibration {
            id: Uuid::new_v4().to_string(),
            timestamp: now_millis(),
            checksum: None,
        }
    }

    pub fn ack(request_id: &str) -> Self {
        Message::Ack {
            id: request_id.to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn progress(request_id: &str, accumulated: &str, chunk: &str) -> Self {
        Message::Progress {
            id: request_id.to_string(),
            timestamp: now_millis(),
            status: Status::Streaming,
            payload: ProgressPayload {
                accumulated: accumulated.to_string(),
                chunk: chunk.to_string(),
            },
            checksum: None,
        }
    }

    pub fn response(request_id: &str, status: Status, payload: Value) -> Self {
        Message::Response {
            id: request_id.to_string(),
            timestamp: now_millis(),
            status,
            payload,
            checksum: None,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Message::Request { id, .. }
            | Message::Calibration { id, .. }
            | Message::Ack { id, .. }
            | Message::Progress { id, .. }
            | Message::Response { id, .. } => id,
        }
    }

    pub fn checksum(&self) -> Option<&str> {
        match self {
            Message::Request { checksum, .. }
            | Message::Calibration { checksum, .. }
            | Message::Progress { checksum, .. }
            | Message::Response { checksum, .. } => checksum.as_deref(),
            Message::Ack { .. } => None,
        }
    }

    fn set_checksum(&mut self, value: String) {
        match self {
            Message::Request { checksum, .. }
            | Message::Calibration { checksum, .. }
            | Message::Progress { checksum, .. }
            | Message::Response { checksum, .. } => *checksum = Some(value),
            Message::Ack { .. } => {}
        }
    }

    /// The terminator appended to this message kind on the wire.
    pub fn sentinel(&self) -> &'static str {
        match self {
            Message::Request { .. } | Message::Calibration { .. } => REQUEST_SENTINEL,
            Message::Ack { .. } => ACK_SUFFIX,
            Message::Progress { .. } => PROGRESS_SENTINEL,
            Message::Response { .. } => RESPONSE_SENTINEL,
        }
    }
}

/// Canonical JSON body of a message with the checksum field absent.
///
/// `serde_json::Value` objects order their keys alphabetically, so the digest
/// is independent of struct field order.
fn canonical_body(message: &Message) -> RelayResult<String> {
    let mut value = serde_json::to_value(message)?;
    if let Value::Object(map) = &mut value {
        map.remove("checksum");
    }
    Ok(value.to_string())
}

/// Computes the integrity digest over the canonical body.
pub fn compute_checksum(message: &Message) -> RelayResult<String> {
    let body = canonical_body(message)?;
    let digest = Sha256::digest(body.as_bytes());
    Ok(format!("sha256-{}", hex::encode(digest)))
}

/// Recomputes the digest with the embedded checksum stripped and compares.
///
/// A mismatch is a diagnostic, not a gate: callers log it and forward the
/// message anyway. Messages without an embedded checksum verify trivially.
pub fn verify(message: &Message) -> bool {
    match message.checksum() {
        Some(embedded) => match compute_checksum(message) {
            Ok(expected) => expected == embedded,
            Err(_) => false,
        },
        None => true,
    }
}

/// Serializes a message, attaches its checksum, and appends the sentinel.
///
/// Fails when the serialized body itself contains a sentinel substring: the
/// framing is string-based, so such a payload could never be extracted
/// unambiguously by the peer.
pub fn encode(message: &Message) -> RelayResult<String> {
    if let Message::Ack { id, .. } = message {
        if id.contains('|') {
            return Err(RelayError::Codec(format!(
                "ack id {id:?} would corrupt the ack sentinel"
            )));
        }
        return Ok(format!("{ACK_PREFIX}{id}{ACK_SUFFIX}"));
    }

    let mut stamped = message.clone();
    stamped.set_checksum(compute_checksum(message)?);
    let body = serde_json::to_string(&stamped)?;
    if let Some(sentinel) = SENTINELS.iter().find(|s| body.contains(**s)) {
        return Err(RelayError::Codec(format!(
            "message body contains the sentinel {sentinel:?}"
        )));
    }
    Ok(format!("{body}{}", message.sentinel()))
}

/// Returns the substring of `blob` before the first occurrence of
/// `sentinel`, or `None` when the sentinel is absent (message not yet fully
/// published).
pub fn extract<'a>(blob: &'a str, sentinel: &str) -> Option<&'a str> {
    blob.find(sentinel).map(|end| &blob[..end])
}

/// Classifies a raw channel blob by sentinel and parses the framed message.
///
/// `Ok(None)` is a transport miss: no sentinel present. A present sentinel
/// with an unparseable body is an error; callers log it and keep polling.
pub fn decode(blob: &str) -> RelayResult<Option<Message>> {
    // An ack is the sentinel itself with the id embedded, no JSON body.
    if let Some(start) = blob.find(ACK_PREFIX) {
        let rest = &blob[start + ACK_PREFIX.len()..];
        return match rest.find(ACK_SUFFIX) {
            Some(end) => Ok(Some(Message::ack(&rest[..end]))),
            None => Ok(None),
        };
    }

    for sentinel in [PROGRESS_SENTINEL, RESPONSE_SENTINEL, REQUEST_SENTINEL] {
        if let Some(body) = extract(blob, sentinel) {
            let message = serde_json::from_str::<Message>(body).map_err(|e| {
                RelayError::Codec(format!("unparseable body before {sentinel}: {e}"))
            })?;
            return Ok(Some(message));
        }
    }
    Ok(None)
}
