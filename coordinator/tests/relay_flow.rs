//! End-to-end exchanges over the in-memory channel: coordinator and bridge
//! coupled only by the one-slot channel and simulated clicks, with the mock
//! upstream playing the chat backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clipwire_bridge::Bridge;
use clipwire_core::channel::{Channel, InMemoryChannel};
use clipwire_core::config::{BridgeConfig, CoordinatorConfig};
use clipwire_core::errors::RelayError;
use clipwire_core::message::{self, Action, Message, Status};
use clipwire_coordinator::actuator::ChannelActuator;
use clipwire_coordinator::relay::{ClickTargets, Coordinator, ScreenPoint};
use serde_json::json;

async fn start_mock_upstream() -> SocketAddr {
    let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap())
        .serve(clipwire_mock_upstream::router().into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

fn fast_coordinator_config(timeout_ms: u64) -> CoordinatorConfig {
    CoordinatorConfig {
        poll_interval_ms: 20,
        retrigger_interval_ms: 100,
        settle_delay_ms: 1,
        request_timeout_ms: timeout_ms,
        actuator_reply_timeout_ms: 500,
        ..Default::default()
    }
}

fn bridge_config(upstream_addr: SocketAddr) -> BridgeConfig {
    BridgeConfig {
        upstream_base_url: format!("http://{upstream_addr}"),
        auth_token: clipwire_mock_upstream::MOCK_TOKEN.to_string(),
        display_delay_ms: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn chat_round_trip_streams_and_resolves() {
    let upstream = start_mock_upstream().await;
    let channel = Arc::new(InMemoryChannel::new());
    let (actuator, clicks) = ChannelActuator::new(channel.clone());

    let bridge = Bridge::new(bridge_config(upstream), channel.clone());
    tokio::spawn(clipwire_bridge::drive(bridge, clicks));

    let coordinator = Arc::new(Coordinator::new(
        fast_coordinator_config(10_000),
        Arc::new(actuator),
    ));

    // Calibration bootstrap closes the loop before any request flows.
    assert!(coordinator.probe(ScreenPoint { x: 500, y: 400 }).await.unwrap());

    let mut progress = coordinator.progress();
    let observed = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));
    let collector = {
        let observed = observed.clone();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let accumulated = progress.borrow().as_ref().map(|p| p.accumulated.clone());
                if let Some(accumulated) = accumulated {
                    observed.lock().await.push(accumulated);
                }
            }
        })
    };

    let response = coordinator
        .execute(Action::Chat, json!({ "message": "hi" }))
        .await
        .unwrap();
    collector.abort();

    let Message::Response {
        status, payload, ..
    } = response
    else {
        panic!("expected a response message");
    };
    assert_eq!(status, Status::Success);
    let content = payload["content"].as_str().unwrap();
    assert_eq!(content, clipwire_mock_upstream::canned_reply());

    // Progress accumulations only ever grow and are prefixes of the final
    // content.
    let observed = observed.lock().await;
    assert!(!observed.is_empty(), "no progress updates observed");
    let mut last_len = 0;
    for accumulated in observed.iter() {
        assert!(accumulated.len() >= last_len, "accumulated text shrank");
        assert!(content.starts_with(accumulated.as_str()));
        last_len = accumulated.len();
    }

    let status = coordinator.status().await;
    assert_eq!(status.stats.requests_sent, 1);
    assert_eq!(status.stats.responses_received, 1);
    assert_eq!(status.stats.errors, 0);
    assert_eq!(status.pending_requests, 0);
}

#[tokio::test]
async fn timeout_fails_the_request_and_restores_the_channel() {
    let channel = Arc::new(InMemoryChannel::new());
    channel.write("important clipboard text").await.unwrap();

    // Keep the click receiver alive but never answer: the peer is gone.
    let (actuator, _clicks) = ChannelActuator::new(channel.clone());
    let coordinator = Coordinator::new(fast_coordinator_config(300), Arc::new(actuator));
    coordinator
        .calibrate(ClickTargets::Single(ScreenPoint { x: 1, y: 2 }))
        .await;

    let started = std::time::Instant::now();
    let outcome = coordinator
        .execute(Action::Chat, json!({ "message": "anyone there?" }))
        .await;
    match outcome {
        Err(RelayError::Timeout(_)) => {}
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(300));

    // Cleanup is unconditional: the pre-request content is back.
    assert_eq!(channel.read().await.unwrap(), "important clipboard text");
    let status = coordinator.status().await;
    assert_eq!(status.stats.errors, 1);
    assert_eq!(status.pending_requests, 0);
}

#[tokio::test]
async fn duplicate_responses_honor_only_the_first() {
    let channel = Arc::new(InMemoryChannel::new());
    let (actuator, _clicks) = ChannelActuator::new(channel.clone());
    let coordinator = Arc::new(Coordinator::new(
        fast_coordinator_config(5_000),
        Arc::new(actuator),
    ));
    coordinator
        .calibrate(ClickTargets::Single(ScreenPoint { x: 1, y: 2 }))
        .await;

    // Play a peer that answers the same request twice with different
    // content, as a duplicate click artifact would.
    let responder = {
        let channel = channel.clone();
        tokio::spawn(async move {
            let id = loop {
                let blob = channel.read().await.unwrap();
                if let Ok(Some(Message::Request { id, .. })) = message::decode(&blob) {
                    break id;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            };
            let first = Message::response(&id, Status::Success, json!({ "content": "first" }));
            channel.write(&message::encode(&first).unwrap()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(120)).await;
            let second = Message::response(&id, Status::Success, json!({ "content": "second" }));
            channel.write(&message::encode(&second).unwrap()).await.unwrap();
        })
    };

    let response = coordinator
        .execute(Action::Chat, json!({ "message": "hi" }))
        .await
        .unwrap();
    let Message::Response { payload, .. } = response else {
        panic!("expected a response message");
    };
    assert_eq!(payload["content"], "first");

    responder.await.unwrap();
    // The late duplicate neither resolved anything nor left state behind.
    let status = coordinator.status().await;
    assert_eq!(status.stats.responses_received, 1);
    assert_eq!(status.pending_requests, 0);
}

#[tokio::test]
async fn uncalibrated_coordinator_rejects_requests() {
    let channel = Arc::new(InMemoryChannel::new());
    let (actuator, _clicks) = ChannelActuator::new(channel);
    let coordinator = Coordinator::new(fast_coordinator_config(300), Arc::new(actuator));

    match coordinator.execute(Action::Chat, json!({ "message": "hi" })).await {
        Err(RelayError::NotCalibrated) => {}
        other => panic!("expected NotCalibrated, got {other:?}"),
    }
}
