//! In-process actuator used by the end-to-end demo and tests. The clipboard
//! is an [`InMemoryChannel`] and click loops are forwarded as [`ClickBurst`]
//! values for a bridge driver to consume.

use std::sync::Arc;

use async_trait::async_trait;
use clipwire_core::channel::{Channel, InMemoryChannel};
use clipwire_core::errors::{RelayError, RelayResult};
use clipwire_ipc::actuator_messages::{ActuatorCommand, ActuatorEvent};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::Actuator;

/// One `CLICK_LOOP` command, surfaced to whoever plays the UI side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickBurst {
    pub x: i32,
    pub y: i32,
}

pub struct ChannelActuator {
    channel: Arc<InMemoryChannel>,
    clicks_tx: mpsc::UnboundedSender<ClickBurst>,
    events_tx: broadcast::Sender<ActuatorEvent>,
}

impl ChannelActuator {
    /// Returns the actuator plus the stream of click bursts it emits.
    pub fn new(channel: Arc<InMemoryChannel>) -> (Self, mpsc::UnboundedReceiver<ClickBurst>) {
        let (clicks_tx, clicks_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(64);
        (
            Self {
                channel,
                clicks_tx,
                events_tx,
            },
            clicks_rx,
        )
    }
}

#[async_trait]
impl Actuator for ChannelActuator {
    async fn send(&self, command: ActuatorCommand) -> RelayResult<()> {
        debug!(cmd = command.name(), "mock actuator command");
        match command {
            ActuatorCommand::SetClipboard { data } => self.channel.write(&data).await,
            ActuatorCommand::GetClipboard => {
                let data = self.channel.read().await?;
                let _ = self.events_tx.send(ActuatorEvent::ClipboardContent {
                    data,
                    timestamp: None,
                });
                Ok(())
            }
            ActuatorCommand::SaveClipboard => {
                self.channel.save().await;
                Ok(())
            }
            ActuatorCommand::RestoreClipboard => {
                self.channel.restore().await;
                Ok(())
            }
            ActuatorCommand::ClickLoop { x, y, .. } => self
                .clicks_tx
                .send(ClickBurst { x, y })
                .map_err(|_| RelayError::Actuator("click consumer went away".into())),
            ActuatorCommand::Ping => {
                let _ = self
                    .events_tx
                    .send(ActuatorEvent::Pong { timestamp: None });
                Ok(())
            }
            // Pointer and status commands have no in-process equivalent.
            ActuatorCommand::SaveMouse
            | ActuatorCommand::RestoreMouse
            | ActuatorCommand::StopClicking
            | ActuatorCommand::SetStatus { .. } => Ok(()),
        }
    }

    fn events(&self) -> broadcast::Receiver<ActuatorEvent> {
        self.events_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn read_clipboard_round_trips_through_events() {
        let channel = Arc::new(InMemoryChannel::new());
        let (actuator, _clicks) = ChannelActuator::new(channel.clone());
        actuator
            .send(ActuatorCommand::SetClipboard {
                data: "framed content".into(),
            })
            .await
            .unwrap();
        let read = actuator
            .read_clipboard(Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(read, "framed content");
    }

    #[tokio::test]
    async fn click_loops_surface_as_bursts() {
        let channel = Arc::new(InMemoryChannel::new());
        let (actuator, mut clicks) = ChannelActuator::new(channel);
        actuator
            .send(ActuatorCommand::ClickLoop {
                x: 11,
                y: 22,
                interval: 100,
                max_duration: 1000,
            })
            .await
            .unwrap();
        assert_eq!(clicks.recv().await, Some(ClickBurst { x: 11, y: 22 }));
    }
}
