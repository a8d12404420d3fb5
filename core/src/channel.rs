use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::RelayResult;

/// The one-slot mailbox shared by the coordinator and the bridge.
///
/// On a real deployment this is the OS clipboard reached through the
/// actuator; demos and tests use [`InMemoryChannel`].
#[async_trait]
pub trait Channel: Send + Sync {
    async fn read(&self) -> RelayResult<String>;
    async fn write(&self, content: &str) -> RelayResult<()>;
}

#[async_trait]
impl<T: Channel + ?Sized> Channel for Arc<T> {
    async fn read(&self) -> RelayResult<String> {
        (**self).read().await
    }

    async fn write(&self, content: &str) -> RelayResult<()> {
        (**self).write(content).await
    }
}

/// In-process channel with the same save/restore surface the actuator
/// exposes for the real clipboard.
#[derive(Debug, Default)]
pub struct InMemoryChannel {
    slot: Mutex<String>,
    saved: Mutex<String>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots the current content for a later [`restore`](Self::restore).
    pub async fn save(&self) {
        let current = self.slot.lock().await.clone();
        *self.saved.lock().await = current;
    }

    pub async fn restore(&self) {
        let saved = self.saved.lock().await.clone();
        *self.slot.lock().await = saved;
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn read(&self) -> RelayResult<String> {
        Ok(self.slot.lock().await.clone())
    }

    async fn write(&self, content: &str) -> RelayResult<()> {
        *self.slot.lock().await = content.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_restore_round_trip() {
        let channel = InMemoryChannel::new();
        channel.write("original").await.unwrap();
        channel.save().await;
        channel.write("scratch").await.unwrap();
        assert_eq!(channel.read().await.unwrap(), "scratch");
        channel.restore().await;
        assert_eq!(channel.read().await.unwrap(), "original");
    }
}
