//! Click-driven bridge behavior against the mock upstream: calibration
//! bootstrap, the chat workflow, duplicate-delivery idempotence, and the
//! error paths that must still publish a response.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use clipwire_bridge::{Bridge, BridgeState, ClickOutcome};
use clipwire_core::channel::{Channel, InMemoryChannel};
use clipwire_core::config::BridgeConfig;
use clipwire_core::errors::RelayResult;
use clipwire_core::message::{
    self, Action, Message, Status, ACK_PREFIX, PROGRESS_SENTINEL, RESPONSE_SENTINEL,
};
use serde_json::json;
use tokio::sync::Mutex;

/// Channel wrapper that keeps every write, so tests can count the acks,
/// progress messages, and responses a bridge published.
#[derive(Default)]
struct RecordingChannel {
    inner: InMemoryChannel,
    writes: Mutex<Vec<String>>,
}

impl RecordingChannel {
    async fn writes_containing(&self, needle: &str) -> usize {
        self.writes
            .lock()
            .await
            .iter()
            .filter(|w| w.contains(needle))
            .count()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn read(&self) -> RelayResult<String> {
        self.inner.read().await
    }

    async fn write(&self, content: &str) -> RelayResult<()> {
        self.writes.lock().await.push(content.to_string());
        self.inner.write(content).await
    }
}

async fn start_mock_upstream() -> SocketAddr {
    let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap())
        .serve(clipwire_mock_upstream::router().into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

fn config_for(upstream_addr: SocketAddr) -> BridgeConfig {
    BridgeConfig {
        upstream_base_url: format!("http://{upstream_addr}"),
        auth_token: clipwire_mock_upstream::MOCK_TOKEN.to_string(),
        display_delay_ms: 1,
        ..Default::default()
    }
}

/// A calibrated bridge over a recording channel, ready for requests.
async fn ready_bridge(upstream_addr: SocketAddr) -> (Bridge<Arc<RecordingChannel>>, Arc<RecordingChannel>) {
    let channel = Arc::new(RecordingChannel::default());
    let mut bridge = Bridge::new(config_for(upstream_addr), channel.clone());
    assert_eq!(
        bridge.on_click().await.unwrap(),
        ClickOutcome::CalibrationPublished
    );
    (bridge, channel)
}

#[tokio::test]
async fn first_click_publishes_the_calibration_message() {
    let channel = Arc::new(RecordingChannel::default());
    let mut bridge = Bridge::new(config_for("127.0.0.1:1".parse().unwrap()), channel.clone());
    assert_eq!(bridge.state(), BridgeState::Calibrating);

    let outcome = bridge.on_click().await.unwrap();
    assert_eq!(outcome, ClickOutcome::CalibrationPublished);
    assert_eq!(bridge.state(), BridgeState::Ready);

    let blob = channel.read().await.unwrap();
    assert!(matches!(
        message::decode(&blob).unwrap(),
        Some(Message::Calibration { .. })
    ));

    // Further clicks with nothing new on the channel do nothing.
    assert_eq!(bridge.on_click().await.unwrap(), ClickOutcome::Idle);
}

#[tokio::test]
async fn chat_request_streams_progress_then_one_response() {
    let upstream = start_mock_upstream().await;
    let (mut bridge, channel) = ready_bridge(upstream).await;

    let request = Message::request(Action::Chat, json!({ "message": "hi" }));
    channel
        .write(&message::encode(&request).unwrap())
        .await
        .unwrap();

    let outcome = bridge.on_click().await.unwrap();
    assert_eq!(outcome, ClickOutcome::Completed(request.id().to_string()));
    assert_eq!(bridge.state(), BridgeState::Success);

    // The request was acked before the slow part started.
    assert_eq!(
        channel
            .writes_containing(&format!("{ACK_PREFIX}{}", request.id()))
            .await,
        1
    );

    // Progress accumulations only ever grow, and the last one matches the
    // final response content.
    let writes = channel.writes.lock().await.clone();
    let mut last_accumulated = String::new();
    for write in &writes {
        if let Ok(Some(Message::Progress { id, payload, .. })) = message::decode(write) {
            assert_eq!(id, request.id());
            assert!(payload.accumulated.len() >= last_accumulated.len());
            assert!(payload.accumulated.starts_with(&last_accumulated));
            assert!(payload.accumulated.ends_with(&payload.chunk));
            last_accumulated = payload.accumulated;
        }
    }
    assert!(!last_accumulated.is_empty(), "no progress was published");

    let final_blob = channel.read().await.unwrap();
    match message::decode(&final_blob).unwrap() {
        Some(Message::Response {
            id,
            status,
            payload,
            ..
        }) => {
            assert_eq!(id, request.id());
            assert_eq!(status, Status::Success);
            assert_eq!(payload["content"], clipwire_mock_upstream::canned_reply());
            assert_eq!(payload["content"], last_accumulated.as_str());
        }
        other => panic!("expected a response on the channel, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_request_delivery_produces_exactly_one_response() {
    let upstream = start_mock_upstream().await;
    let (mut bridge, channel) = ready_bridge(upstream).await;

    let request = Message::request(Action::Chat, json!({ "message": "hi" }));
    let encoded = message::encode(&request).unwrap();

    channel.write(&encoded).await.unwrap();
    assert_eq!(
        bridge.on_click().await.unwrap(),
        ClickOutcome::Completed(request.id().to_string())
    );

    // The coordinator keeps clicking until it sees the response, so the
    // same request lands again, both in and out of the terminal state.
    channel.write(&encoded).await.unwrap();
    assert_eq!(bridge.on_click().await.unwrap(), ClickOutcome::Idle);
    bridge.return_to_ready();
    channel.write(&encoded).await.unwrap();
    assert_eq!(bridge.on_click().await.unwrap(), ClickOutcome::Idle);

    assert_eq!(channel.writes_containing(RESPONSE_SENTINEL).await, 1);
}

#[tokio::test]
async fn unknown_action_fails_immediately_with_an_error_response() {
    let upstream = start_mock_upstream().await;
    let (mut bridge, channel) = ready_bridge(upstream).await;

    let request = Message::Request {
        id: "req-unknown-action".into(),
        timestamp: message::now_millis(),
        action: "reboot".into(),
        payload: json!({}),
        checksum: None,
    };
    channel
        .write(&message::encode(&request).unwrap())
        .await
        .unwrap();

    let outcome = bridge.on_click().await.unwrap();
    assert_eq!(outcome, ClickOutcome::Failed("req-unknown-action".into()));
    assert_eq!(bridge.state(), BridgeState::Error);

    let blob = channel.read().await.unwrap();
    match message::decode(&blob).unwrap() {
        Some(Message::Response {
            status, payload, ..
        }) => {
            assert_eq!(status, Status::Error);
            assert!(payload["error"].as_str().unwrap().contains("reboot"));
        }
        other => panic!("expected an error response, got {other:?}"),
    }
    assert_eq!(channel.writes_containing(PROGRESS_SENTINEL).await, 0);
}

#[tokio::test]
async fn upstream_failure_is_republished_as_an_error_response() {
    // Nothing listens here; the create-chat call fails outright.
    let unreachable: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let (mut bridge, channel) = ready_bridge(unreachable).await;

    let request = Message::request(Action::Chat, json!({ "message": "hi" }));
    channel
        .write(&message::encode(&request).unwrap())
        .await
        .unwrap();

    let outcome = bridge.on_click().await.unwrap();
    assert_eq!(outcome, ClickOutcome::Failed(request.id().to_string()));

    let blob = channel.read().await.unwrap();
    match message::decode(&blob).unwrap() {
        Some(Message::Response { id, status, .. }) => {
            assert_eq!(id, request.id());
            assert_eq!(status, Status::Error);
        }
        other => panic!("expected an error response, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_is_advisory_and_answers_cancelled() {
    let upstream = start_mock_upstream().await;
    let (mut bridge, channel) = ready_bridge(upstream).await;

    let request = Message::request(Action::Cancel, json!({}));
    channel
        .write(&message::encode(&request).unwrap())
        .await
        .unwrap();

    let outcome = bridge.on_click().await.unwrap();
    assert_eq!(outcome, ClickOutcome::Completed(request.id().to_string()));

    let blob = channel.read().await.unwrap();
    match message::decode(&blob).unwrap() {
        Some(Message::Response { status, .. }) => assert_eq!(status, Status::Cancelled),
        other => panic!("expected a cancelled response, got {other:?}"),
    }
}

#[tokio::test]
async fn continue_extends_the_conversation_from_the_first_chat() {
    let upstream = start_mock_upstream().await;
    let (mut bridge, channel) = ready_bridge(upstream).await;

    let first = Message::request(Action::Chat, json!({ "message": "hi" }));
    channel
        .write(&message::encode(&first).unwrap())
        .await
        .unwrap();
    bridge.on_click().await.unwrap();
    bridge.return_to_ready();

    let chat_id = {
        let blob = channel.read().await.unwrap();
        match message::decode(&blob).unwrap() {
            Some(Message::Response { payload, .. }) => {
                payload["chat_id"].as_str().unwrap().to_string()
            }
            other => panic!("expected a response, got {other:?}"),
        }
    };

    let follow_up = Message::request(Action::Continue, json!({ "message": "and then?" }));
    channel
        .write(&message::encode(&follow_up).unwrap())
        .await
        .unwrap();
    let outcome = bridge.on_click().await.unwrap();
    assert_eq!(outcome, ClickOutcome::Completed(follow_up.id().to_string()));

    let blob = channel.read().await.unwrap();
    match message::decode(&blob).unwrap() {
        Some(Message::Response {
            status, payload, ..
        }) => {
            assert_eq!(status, Status::Success);
            // The follow-up ran in the conversation the first chat opened.
            assert_eq!(payload["chat_id"], chat_id.as_str());
        }
        other => panic!("expected a response, got {other:?}"),
    }
}
