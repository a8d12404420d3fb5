//! The seam between the coordinator and the OS-level mouse/clipboard
//! actuator. [`SubprocessActuator`] drives the real agent over its standard
//! streams; [`ChannelActuator`] backs demos and tests with the in-memory
//! channel.

mod mock;
mod subprocess;

pub use mock::{ChannelActuator, ClickBurst};
pub use subprocess::SubprocessActuator;

use std::time::Duration;

use async_trait::async_trait;
use clipwire_core::errors::{RelayError, RelayResult};
use clipwire_ipc::actuator_messages::{ActuatorCommand, ActuatorEvent};
use tokio::sync::broadcast;

/// Command sink plus asynchronous event stream.
///
/// The actuator protocol carries no correlation ids, so replies to
/// `GET_CLIPBOARD` and `PING` are recognized purely by event type; the
/// provided helpers wait for the next matching event with a bounded timeout.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Fire-and-forget command dispatch.
    async fn send(&self, command: ActuatorCommand) -> RelayResult<()>;

    /// Subscribes to the actuator's event stream.
    fn events(&self) -> broadcast::Receiver<ActuatorEvent>;

    /// Issues `GET_CLIPBOARD` and waits for the `clipboard_content` event.
    async fn read_clipboard(&self, reply_timeout: Duration) -> RelayResult<String> {
        let mut events = self.events();
        self.send(ActuatorCommand::GetClipboard).await?;
        wait_for(&mut events, reply_timeout, |event| match event {
            ActuatorEvent::ClipboardContent { data, .. } => Some(data),
            _ => None,
        })
        .await
    }

    /// Issues `PING` and waits for the `pong` event.
    async fn ping(&self, reply_timeout: Duration) -> RelayResult<()> {
        let mut events = self.events();
        self.send(ActuatorCommand::Ping).await?;
        wait_for(&mut events, reply_timeout, |event| match event {
            ActuatorEvent::Pong { .. } => Some(()),
            _ => None,
        })
        .await
    }
}

async fn wait_for<T>(
    events: &mut broadcast::Receiver<ActuatorEvent>,
    reply_timeout: Duration,
    mut matcher: impl FnMut(ActuatorEvent) -> Option<T> + Send,
) -> RelayResult<T> {
    let waited = tokio::time::timeout(reply_timeout, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = matcher(event) {
                        break Ok(found);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "actuator event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break Err(RelayError::Actuator("actuator event stream closed".into()));
                }
            }
        }
    })
    .await;
    waited.map_err(|_| RelayError::Actuator("timed out waiting for actuator reply".into()))?
}
