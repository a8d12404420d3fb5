//! In-memory mock of the upstream chat backend: conversation CRUD plus an
//! SSE completion endpoint that streams a canned reply word by word. Used
//! by the end-to-end demo and the integration tests.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clipwire_core::conversation::{ConversationState, MessageNode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

/// The bearer token the mock accepts.
pub const MOCK_TOKEN: &str = "mock-token-12345";

/// The canned streamed reply, one SSE event per chunk.
pub const REPLY_CHUNKS: [&str; 8] = [
    "Hello! ",
    "This is ",
    "a mock ",
    "streaming ",
    "response ",
    "from the ",
    "clipwire mock ",
    "server.",
];

const CHUNK_DELAY: Duration = Duration::from_millis(40);

#[derive(Clone, Default)]
pub struct MockState {
    conversations: Arc<Mutex<HashMap<String, ConversationState>>>,
}

#[derive(Deserialize)]
struct NewChatBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    messages: Option<Vec<MessageNode>>,
    #[serde(default)]
    history: Option<clipwire_core::conversation::History>,
}

pub fn router() -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "clipwire mock upstream is running" }))
        .route("/api/v1/chats/new", post(create_chat))
        .route("/api/v1/chats/:id", get(get_chat).post(update_chat))
        .route("/api/chat/completions", post(stream_completions))
        .layer(cors)
        .with_state(MockState::default())
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == MOCK_TOKEN)
}

fn unauthorized() -> axum::response::Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
}

async fn create_chat(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<NewChatBody>,
) -> axum::response::Response {
    if !authorized(&headers) {
        return unauthorized();
    }

    let chat_id = format!("mock-conv-{}", uuid::Uuid::new_v4());
    let mut conversation = match (body.messages, body.history) {
        (Some(messages), Some(history)) => ConversationState {
            id: None,
            messages,
            history,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        },
        _ => ConversationState::opening(body.message.as_deref().unwrap_or("Hello")),
    };
    conversation.id = Some(chat_id.clone());

    state
        .conversations
        .lock()
        .await
        .insert(chat_id.clone(), conversation);
    info!(chat_id = %chat_id, "conversation created");

    Json(json!({
        "id": chat_id,
        "created_at": chrono::Utc::now().timestamp(),
        "user_id": "mock-user-123",
    }))
    .into_response()
}

async fn get_chat(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> axum::response::Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    match state.conversations.lock().await.get(&id) {
        Some(conversation) => Json(conversation.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Conversation not found" })),
        )
            .into_response(),
    }
}

async fn update_chat(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<ConversationState>,
) -> axum::response::Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut conversations = state.conversations.lock().await;
    match conversations.get_mut(&id) {
        Some(conversation) => {
            conversation.messages = update.messages;
            conversation.history = update.history;
            debug!(chat_id = %id, nodes = conversation.messages.len(), "conversation updated");
            Json(conversation.clone()).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Conversation not found" })),
        )
            .into_response(),
    }
}

async fn stream_completions(headers: HeaderMap) -> axum::response::Response {
    if !authorized(&headers) {
        return unauthorized();
    }

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);
    tokio::spawn(async move {
        for (index, chunk) in REPLY_CHUNKS.iter().enumerate() {
            let data = json!({
                "id": (index + 1).to_string(),
                "choices": [{ "delta": { "content": chunk } }],
            });
            if tx.send(Ok(Event::default().data(data.to_string()))).await.is_err() {
                return;
            }
            tokio::time::sleep(CHUNK_DELAY).await;
        }
        let done = json!({ "choices": [{ "finish_reason": "stop" }] });
        let _ = tx.send(Ok(Event::default().data(done.to_string()))).await;
    });

    Sse::new(ReceiverStream::new(rx)).into_response()
}

/// The full canned reply the completion stream produces.
pub fn canned_reply() -> String {
    REPLY_CHUNKS.concat()
}
