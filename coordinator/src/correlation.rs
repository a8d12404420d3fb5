//! Maps in-flight request ids to their completion handles.
//!
//! Exactly one terminal outcome is delivered per submitted id: either
//! `resolve` with the peer's response or `expire` with a timeout error.
//! Races between the two settle by table membership; whichever acts first
//! while the entry still exists wins, the loser sees a missing entry and
//! does nothing.

use std::collections::HashMap;
use std::time::Instant;

use clipwire_core::errors::{RelayError, RelayResult};
use clipwire_core::message::Message;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

/// A request awaiting its response on the channel.
struct PendingRequest {
    request: Message,
    responder: oneshot::Sender<RelayResult<Message>>,
    started_at: Instant,
    retries: u32,
}

/// Completion handle returned by [`CorrelationTable::submit`].
pub type ResponseHandle = oneshot::Receiver<RelayResult<Message>>;

#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending request and returns its completion handle.
    pub async fn submit(&self, request: &Message) -> RelayResult<ResponseHandle> {
        let id = request.id().to_string();
        let (responder, handle) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&id) {
            return Err(RelayError::Correlation(format!(
                "request {id} is already in flight"
            )));
        }
        pending.insert(
            id,
            PendingRequest {
                request: request.clone(),
                responder,
                started_at: Instant::now(),
                retries: 0,
            },
        );
        Ok(handle)
    }

    /// Completes the entry for `id` with `response`. Returns false when the
    /// id is unknown or already settled, in which case nothing happens.
    pub async fn resolve(&self, id: &str, response: Message) -> bool {
        match self.pending.lock().await.remove(id) {
            Some(entry) => {
                debug!(
                    id,
                    elapsed_ms = entry.started_at.elapsed().as_millis() as u64,
                    retries = entry.retries,
                    "pending request resolved"
                );
                let _ = entry.responder.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Fails the entry for `id` with a timeout, if it still exists.
    pub async fn expire(&self, id: &str) -> bool {
        match self.pending.lock().await.remove(id) {
            Some(entry) => {
                let action = match &entry.request {
                    Message::Request { action, .. } => action.as_str(),
                    _ => "",
                };
                debug!(id, action, retries = entry.retries, "pending request expired");
                let _ = entry
                    .responder
                    .send(Err(RelayError::Timeout(id.to_string())));
                true
            }
            None => false,
        }
    }

    /// Drops the entry for `id` without delivering an outcome through the
    /// handle. Used when the exchange fails before polling ever starts and
    /// the error is returned to the caller directly.
    pub async fn abort(&self, id: &str) -> bool {
        self.pending.lock().await.remove(id).is_some()
    }

    /// Bumps the retry counter when the click trigger is re-issued.
    pub async fn record_retry(&self, id: &str) -> u32 {
        let mut pending = self.pending.lock().await;
        match pending.get_mut(id) {
            Some(entry) => {
                entry.retries += 1;
                entry.retries
            }
            None => 0,
        }
    }

    /// How long the request for `id` has been in flight.
    pub async fn elapsed(&self, id: &str) -> Option<std::time::Duration> {
        self.pending
            .lock()
            .await
            .get(id)
            .map(|entry| entry.started_at.elapsed())
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipwire_core::message::{Action, Status};
    use serde_json::json;

    fn request() -> Message {
        Message::request(Action::Chat, json!({ "message": "hi" }))
    }

    #[tokio::test]
    async fn resolve_delivers_exactly_one_outcome() {
        let table = CorrelationTable::new();
        let req = request();
        let handle = table.submit(&req).await.unwrap();

        let response = Message::response(req.id(), Status::Success, json!({ "content": "ok" }));
        assert!(table.resolve(req.id(), response.clone()).await);
        // A duplicate response observed on a later poll is a no-op.
        assert!(!table.resolve(req.id(), response).await);
        assert!(!table.expire(req.id()).await);

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.id(), req.id());
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn expire_fails_the_handle_once() {
        let table = CorrelationTable::new();
        let req = request();
        let handle = table.submit(&req).await.unwrap();

        assert!(table.expire(req.id()).await);
        assert!(!table.expire(req.id()).await);
        assert!(
            !table
                .resolve(
                    req.id(),
                    Message::response(req.id(), Status::Success, json!({}))
                )
                .await
        );

        match handle.await.unwrap() {
            Err(RelayError::Timeout(id)) => assert_eq!(id, req.id()),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_id_is_a_no_op() {
        let table = CorrelationTable::new();
        assert!(
            !table
                .resolve("nobody", Message::response("nobody", Status::Success, json!({})))
                .await
        );
        assert!(!table.expire("nobody").await);
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let table = CorrelationTable::new();
        let req = request();
        let _handle = table.submit(&req).await.unwrap();
        assert!(matches!(
            table.submit(&req).await,
            Err(RelayError::Correlation(_))
        ));
    }

    #[tokio::test]
    async fn retries_are_counted_per_entry() {
        let table = CorrelationTable::new();
        let req = request();
        let _handle = table.submit(&req).await.unwrap();
        assert_eq!(table.record_retry(req.id()).await, 1);
        assert_eq!(table.record_retry(req.id()).await, 2);
        assert_eq!(table.record_retry("nobody").await, 0);
    }
}
