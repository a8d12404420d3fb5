//! Client for the upstream chat backend the bridge drives while processing
//! a request: create a conversation, append the assistant response slot,
//! then stream the completion as server-sent events.

use clipwire_core::config::BridgeConfig;
use clipwire_core::conversation::ConversationState;
use clipwire_core::errors::{RelayError, RelayResult};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

/// Reply to a create-conversation call; the backend returns more fields but
/// only the id matters here.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedChat {
    pub id: String,
}

/// Body of the stream-completion call.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub session_id: String,
    pub chat_id: String,
    /// Id of the assistant message slot being filled.
    pub id: String,
    pub stream: bool,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    delta: CompletionDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionDelta {
    #[serde(default)]
    content: Option<String>,
}

impl UpstreamClient {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Opens a new conversation seeded with the user's prompt.
    pub async fn create_chat(&self, prompt: &str) -> RelayResult<CreatedChat> {
        let state = ConversationState::opening(prompt);
        let body = serde_json::json!({
            "message": prompt,
            "messages": state.messages,
            "history": state.history,
            "timestamp": state.timestamp,
        });
        let response = self
            .http
            .post(self.url("/api/v1/chats/new"))
            .bearer_auth(&self.auth_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "chat creation failed: {}",
                response.status()
            )));
        }
        let created: CreatedChat = response.json().await?;
        debug!(chat_id = %created.id, "conversation created");
        Ok(created)
    }

    pub async fn fetch_conversation(&self, chat_id: &str) -> RelayResult<ConversationState> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/chats/{chat_id}")))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "fetching conversation {chat_id} failed: {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Pushes an updated conversation tree (e.g. with the assistant slot
    /// appended) and returns the state as stored by the backend.
    pub async fn update_conversation(
        &self,
        chat_id: &str,
        state: &ConversationState,
    ) -> RelayResult<ConversationState> {
        let response = self
            .http
            .post(self.url(&format!("/api/v1/chats/{chat_id}")))
            .bearer_auth(&self.auth_token)
            .json(state)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "updating conversation {chat_id} failed: {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Starts a streaming completion and returns the delta stream.
    pub async fn start_completion(
        &self,
        request: CompletionRequest,
    ) -> RelayResult<CompletionStream> {
        let response = self
            .http
            .post(self.url("/api/chat/completions"))
            .bearer_auth(&self.auth_token)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RelayError::Upstream(format!(
                "completion stream failed to start: {}",
                response.status()
            )));
        }
        Ok(CompletionStream {
            body: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            pending: std::collections::VecDeque::new(),
            finished: false,
        })
    }
}

/// Incremental text deltas parsed from an SSE completion stream.
///
/// The stream ends either at a `finish_reason: "stop"` event or when the
/// body closes.
pub struct CompletionStream {
    body: std::pin::Pin<
        Box<dyn futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>,
    >,
    buffer: String,
    pending: std::collections::VecDeque<String>,
    finished: bool,
}

impl CompletionStream {
    /// Next content delta, or `None` once the stream has completed.
    pub async fn next_delta(&mut self) -> RelayResult<Option<String>> {
        loop {
            if let Some(delta) = self.pending.pop_front() {
                return Ok(Some(delta));
            }
            if self.finished {
                return Ok(None);
            }
            match self.body.next().await {
                Some(Ok(bytes)) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    self.drain_complete_lines();
                }
                Some(Err(e)) => return Err(e.into()),
                None => self.finished = true,
            }
        }
    }

    fn drain_complete_lines(&mut self) {
        while let Some(end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=end).collect();
            let line = line.trim();
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            match serde_json::from_str::<CompletionChunk>(data) {
                Ok(chunk) => {
                    for choice in chunk.choices {
                        if let Some(content) = choice.delta.content {
                            self.pending.push_back(content);
                        }
                        if choice.finish_reason.as_deref() == Some("stop") {
                            self.finished = true;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "unparseable completion event"),
            }
        }
    }
}
