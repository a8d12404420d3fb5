//! Runs the full exchange in one process: mock upstream, in-memory channel,
//! channel-backed actuator, bridge driver, and coordinator.

use std::sync::Arc;

use anyhow::ensure;
use clipwire_bridge::Bridge;
use clipwire_core::channel::InMemoryChannel;
use clipwire_core::config::{BridgeConfig, CoordinatorConfig};
use clipwire_core::message::{Action, Message};
use clipwire_coordinator::actuator::ChannelActuator;
use clipwire_coordinator::relay::{Coordinator, ScreenPoint};

pub async fn run(message: &str) -> anyhow::Result<()> {
    // Mock upstream on an ephemeral port.
    let server = axum::Server::bind(&"127.0.0.1:0".parse()?)
        .serve(clipwire_mock_upstream::router().into_make_service());
    let upstream_addr = server.local_addr();
    tokio::spawn(server);
    println!("mock upstream on http://{upstream_addr}");

    // The shared one-slot channel and the actuator that exposes it.
    let channel = Arc::new(InMemoryChannel::new());
    let (actuator, clicks) = ChannelActuator::new(channel.clone());

    // UI side: bridge driven by the actuator's click bursts.
    let bridge_config = BridgeConfig {
        upstream_base_url: format!("http://{upstream_addr}"),
        auth_token: clipwire_mock_upstream::MOCK_TOKEN.to_string(),
        display_delay_ms: 200,
        ..Default::default()
    };
    let bridge = Bridge::new(bridge_config, channel.clone());
    tokio::spawn(clipwire_bridge::drive(bridge, clicks));

    // Controller side, with timings tightened for an in-process run.
    let coordinator_config = CoordinatorConfig {
        poll_interval_ms: 50,
        retrigger_interval_ms: 250,
        settle_delay_ms: 5,
        request_timeout_ms: 10_000,
        ..Default::default()
    };
    let coordinator = Arc::new(Coordinator::new(coordinator_config, Arc::new(actuator)));

    // Calibration bootstrap: click the candidate position until the bridge
    // publishes its calibration message.
    let pinned = coordinator.probe(ScreenPoint { x: 500, y: 400 }).await?;
    ensure!(pinned, "bridge never published its calibration message");
    println!("calibrated at (500, 400)");

    // Show streaming progress as it flows back over the channel.
    let mut progress = coordinator.progress();
    let progress_task = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let chars = progress.borrow().as_ref().map(|p| p.accumulated.len());
            if let Some(chars) = chars {
                println!("streaming: {chars} chars");
            }
        }
    });

    println!("sending chat request: {message:?}");
    let response = coordinator
        .execute(Action::Chat, serde_json::json!({ "message": message }))
        .await?;
    progress_task.abort();

    match response {
        Message::Response {
            id,
            status,
            payload,
            ..
        } => {
            println!("response {id} ({status:?}):");
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        other => println!("unexpected message: {other:?}"),
    }
    Ok(())
}
