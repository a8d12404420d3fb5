//! The visible, click-driven state machine on the UI side of the channel.
//!
//! Every piece of logic runs inside a click handler: the first click while
//! calibrating publishes the calibration message, and clicks while ready
//! read the channel, execute the requested workflow against the upstream
//! backend, and publish progress and the final response back into the
//! channel. The coordinator clicks repeatedly to compensate for missed
//! clicks, so duplicate deliveries must be no-ops.

use clipwire_core::channel::Channel;
use clipwire_core::config::BridgeConfig;
use clipwire_core::conversation::ConversationState;
use clipwire_core::errors::{RelayError, RelayResult};
use clipwire_core::message::{self, Action, ChatPayload, ChatResult, ErrorPayload, Message, Status};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::upstream::{CompletionRequest, UpstreamClient};

/// Lifecycle of the bridge, mirrored by the UI overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Calibrating,
    Ready,
    Processing,
    Streaming,
    Success,
    Error,
}

/// What a single click ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Calibration message published; now ready for requests.
    CalibrationPublished,
    /// Nothing to do: no new framed request on the channel.
    Idle,
    /// A request with this id is already being handled.
    Busy,
    /// Request completed and its response was published.
    Completed(String),
    /// Request failed and an error response was published.
    Failed(String),
}

/// The conversation the bridge is currently attached to, used by the
/// `continue` action and dropped by `cancel`.
#[derive(Debug, Clone)]
struct ConversationHandle {
    chat_id: String,
}

pub struct Bridge<C: Channel> {
    config: BridgeConfig,
    channel: C,
    upstream: UpstreamClient,
    state: BridgeState,
    /// Id of the request currently being processed, if any.
    active_id: Option<String>,
    /// Last raw channel content observed, to skip re-reads of the same blob.
    last_seen: String,
    conversation: Option<ConversationHandle>,
}

impl<C: Channel> Bridge<C> {
    pub fn new(config: BridgeConfig, channel: C) -> Self {
        let upstream = UpstreamClient::new(&config);
        Self {
            config,
            channel,
            upstream,
            state: BridgeState::Calibrating,
            active_id: None,
            last_seen: String::new(),
            conversation: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn display_delay(&self) -> std::time::Duration {
        self.config.display_delay()
    }

    /// Leaves a terminal state. Presentation only; drivers call this after
    /// the configured display delay.
    pub fn return_to_ready(&mut self) {
        if matches!(self.state, BridgeState::Success | BridgeState::Error) {
            self.state = BridgeState::Ready;
            self.active_id = None;
        }
    }

    /// Entry point for every click on the bridge surface.
    pub async fn on_click(&mut self) -> RelayResult<ClickOutcome> {
        match self.state {
            BridgeState::Calibrating => self.publish_calibration().await,
            BridgeState::Ready => self.read_and_dispatch().await,
            BridgeState::Processing | BridgeState::Streaming => {
                debug!("click while already processing, ignored");
                Ok(ClickOutcome::Busy)
            }
            // Terminal display states; the driver returns us to ready.
            BridgeState::Success | BridgeState::Error => Ok(ClickOutcome::Idle),
        }
    }

    async fn publish_calibration(&mut self) -> RelayResult<ClickOutcome> {
        let calibration = Message::calibration();
        self.channel.write(&message::encode(&calibration)?).await?;
        self.state = BridgeState::Ready;
        info!("calibration message published");
        Ok(ClickOutcome::CalibrationPublished)
    }

    async fn read_and_dispatch(&mut self) -> RelayResult<ClickOutcome> {
        let blob = self.channel.read().await?;
        if blob.is_empty() || blob == self.last_seen {
            return Ok(ClickOutcome::Idle);
        }
        self.last_seen = blob.clone();

        let decoded = match message::decode(&blob) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return Ok(ClickOutcome::Idle),
            Err(e) => {
                warn!(error = %e, "unparseable channel content, ignoring");
                return Ok(ClickOutcome::Idle);
            }
        };
        if !message::verify(&decoded) {
            warn!(id = decoded.id(), "request checksum mismatch, processing anyway");
        }
        let Message::Request {
            id,
            action,
            payload,
            ..
        } = decoded
        else {
            // Our own output, or something unrelated.
            return Ok(ClickOutcome::Idle);
        };

        if self.active_id.as_deref() == Some(id.as_str()) {
            debug!(id = %id, "duplicate delivery of active request, ignored");
            return Ok(ClickOutcome::Busy);
        }

        self.active_id = Some(id.clone());
        self.state = BridgeState::Processing;
        // Confirm sight of the request before the slow part starts.
        self.channel
            .write(&message::encode(&Message::ack(&id))?)
            .await?;
        info!(id = %id, action = %action, "processing request");

        let response = match self.dispatch(&id, &action, payload).await {
            Ok(response) => {
                self.state = BridgeState::Success;
                response
            }
            Err(e) => {
                warn!(id = %id, error = %e, "request failed");
                self.state = BridgeState::Error;
                Message::response(
                    &id,
                    Status::Error,
                    serde_json::json!(ErrorPayload {
                        error: e.to_string()
                    }),
                )
            }
        };

        // Failures must be republished, never dropped: if the response body
        // itself cannot be framed, publish a plain error instead.
        let encoded = match message::encode(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(id = %id, error = %e, "response could not be framed");
                self.state = BridgeState::Error;
                message::encode(&Message::response(
                    &id,
                    Status::Error,
                    serde_json::json!({ "error": e.to_string() }),
                ))?
            }
        };
        self.channel.write(&encoded).await?;

        match self.state {
            BridgeState::Success => Ok(ClickOutcome::Completed(id)),
            _ => Ok(ClickOutcome::Failed(id)),
        }
    }

    async fn dispatch(&mut self, id: &str, action: &str, payload: Value) -> RelayResult<Message> {
        match Action::parse(action)? {
            Action::Chat => self.handle_chat(id, payload).await,
            Action::Continue => self.handle_continue(id, payload).await,
            Action::Cancel => Ok(self.handle_cancel(id)),
        }
    }

    /// The chat workflow: open a conversation, append the assistant response
    /// slot, then stream the completion into it.
    async fn handle_chat(&mut self, id: &str, payload: Value) -> RelayResult<Message> {
        let chat: ChatPayload = serde_json::from_value(payload)?;
        let created = self.upstream.create_chat(&chat.message).await?;
        let mut state = self.upstream.fetch_conversation(&created.id).await?;

        let user_id = state
            .history
            .current_id
            .clone()
            .ok_or_else(|| RelayError::Upstream("conversation has no current message".into()))?;
        let assistant_id = state.append_child("assistant", "", Some(user_id));
        self.upstream
            .update_conversation(&created.id, &state)
            .await?;

        self.stream_into(id, &created.id, &assistant_id, &mut state, &chat)
            .await
    }

    /// Continues the bridge's current conversation with a follow-up turn.
    async fn handle_continue(&mut self, id: &str, payload: Value) -> RelayResult<Message> {
        let chat: ChatPayload = serde_json::from_value(payload)?;
        let chat_id = chat
            .chat_id
            .clone()
            .or_else(|| self.conversation.as_ref().map(|c| c.chat_id.clone()))
            .ok_or_else(|| {
                RelayError::Upstream("no active conversation to continue".into())
            })?;

        let mut state = self.upstream.fetch_conversation(&chat_id).await?;
        let parent = state.history.current_id.clone();
        let user_id = state.append_child("user", &chat.message, parent);
        let assistant_id = state.append_child("assistant", "", Some(user_id));
        self.upstream.update_conversation(&chat_id, &state).await?;

        self.stream_into(id, &chat_id, &assistant_id, &mut state, &chat)
            .await
    }

    /// Advisory cancel: drop the local conversation handle. Upstream calls
    /// already in flight run to completion on their own.
    fn handle_cancel(&mut self, id: &str) -> Message {
        self.conversation = None;
        info!(id = %id, "conversation handle dropped");
        Message::response(
            id,
            Status::Cancelled,
            serde_json::json!({ "cancelled": true }),
        )
    }

    async fn stream_into(
        &mut self,
        request_id: &str,
        chat_id: &str,
        assistant_id: &str,
        state: &mut ConversationState,
        chat: &ChatPayload,
    ) -> RelayResult<Message> {
        let mut stream = self
            .upstream
            .start_completion(CompletionRequest {
                session_id: self.config.session_id.clone(),
                chat_id: chat_id.to_string(),
                id: assistant_id.to_string(),
                stream: true,
                model: chat.model.clone().unwrap_or_else(|| self.config.model.clone()),
                temperature: chat.temperature.unwrap_or(self.config.temperature),
            })
            .await?;

        let mut accumulated = String::new();
        while let Some(chunk) = stream.next_delta().await? {
            self.state = BridgeState::Streaming;
            accumulated.push_str(&chunk);
            // Each delta goes out as a progress message before we keep
            // accumulating.
            let progress = Message::progress(request_id, &accumulated, &chunk);
            self.channel.write(&message::encode(&progress)?).await?;
        }

        // The stream filled the assistant slot; persist the finished text.
        state.set_content(assistant_id, &accumulated);
        self.upstream.update_conversation(chat_id, state).await?;

        self.conversation = Some(ConversationHandle {
            chat_id: chat_id.to_string(),
        });

        Ok(Message::response(
            request_id,
            Status::Success,
            serde_json::to_value(ChatResult {
                chat_id: chat_id.to_string(),
                message_id: assistant_id.to_string(),
                content: accumulated,
            })?,
        ))
    }
}

/// Runs a bridge against a stream of click events, handling the terminal
/// display delay. The click payload is ignored; only its arrival matters.
pub async fn drive<C: Channel, T: Send>(
    mut bridge: Bridge<C>,
    mut clicks: mpsc::UnboundedReceiver<T>,
) {
    while let Some(_click) = clicks.recv().await {
        match bridge.on_click().await {
            Ok(ClickOutcome::Completed(_) | ClickOutcome::Failed(_)) => {
                tokio::time::sleep(bridge.display_delay()).await;
                bridge.return_to_ready();
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "click handling failed"),
        }
    }
}
