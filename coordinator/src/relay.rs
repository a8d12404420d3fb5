//! The coordinator side of the clipboard exchange: snapshot, publish,
//! trigger, poll, restore.
//!
//! One request is in flight at a time; submissions queue on the flow lock.
//! Polling, re-clicking, and the timeout are arms of a single `select!`
//! loop owned by the in-flight request, so resolving or timing out cancels
//! all of them at once, and channel restoration runs on every exit path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clipwire_core::errors::{RelayError, RelayResult};
use clipwire_core::message::{self, Action, Message, ProgressPayload};
use clipwire_ipc::actuator_messages::ActuatorCommand;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::correlation::{CorrelationTable, ResponseHandle};

/// A calibrated screen coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

/// Where to click to provoke the peer into reading the channel. Multi-control
/// UIs expose separate read and write controls; the read control is always
/// clicked first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickTargets {
    Single(ScreenPoint),
    ReadWrite { read: ScreenPoint, write: ScreenPoint },
}

/// Counters surfaced over the status endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RelayStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
}

/// Mutable coordinator state: calibration, counters, and the processing
/// flag. Owned by the [`Coordinator`] and mutated only by it.
struct RelaySession {
    targets: Option<ClickTargets>,
    stats: RelayStats,
    processing: bool,
    started_at: DateTime<Utc>,
}

/// Snapshot of the session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub calibrated: bool,
    pub targets: Option<ClickTargets>,
    pub processing: bool,
    pub pending_requests: usize,
    pub stats: RelayStats,
    pub started_at: DateTime<Utc>,
}

pub struct Coordinator {
    config: clipwire_core::config::CoordinatorConfig,
    actuator: Arc<dyn Actuator>,
    table: CorrelationTable,
    session: Mutex<RelaySession>,
    /// Serializes exchanges: only one request occupies the channel at a time.
    flow: Mutex<()>,
    /// Streaming accumulator view for external observers; `None` between
    /// requests.
    progress_tx: watch::Sender<Option<ProgressPayload>>,
}

impl Coordinator {
    pub fn new(
        config: clipwire_core::config::CoordinatorConfig,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        let (progress_tx, _) = watch::channel(None);
        Self {
            config,
            actuator,
            table: CorrelationTable::new(),
            session: Mutex::new(RelaySession {
                targets: None,
                stats: RelayStats::default(),
                processing: false,
                started_at: Utc::now(),
            }),
            flow: Mutex::new(()),
            progress_tx,
        }
    }

    /// Observer handle for streaming progress of the in-flight request.
    pub fn progress(&self) -> watch::Receiver<Option<ProgressPayload>> {
        self.progress_tx.subscribe()
    }

    /// Pins the click target(s) for all subsequent exchanges.
    pub async fn calibrate(&self, targets: ClickTargets) {
        info!(?targets, "click targets calibrated");
        self.session.lock().await.targets = Some(targets);
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let session = self.session.lock().await;
        CoordinatorStatus {
            calibrated: session.targets.is_some(),
            targets: session.targets,
            processing: session.processing,
            pending_requests: self.table.len().await,
            stats: session.stats,
            started_at: session.started_at,
        }
    }

    /// Pings the actuator subprocess.
    pub async fn ping_actuator(&self) -> RelayResult<()> {
        self.actuator
            .ping(self.config.actuator_reply_timeout())
            .await
    }

    /// Updates the actuator's tray status line.
    pub async fn set_status(&self, status: &str) -> RelayResult<()> {
        self.actuator
            .send(ActuatorCommand::SetStatus {
                message: status.to_string(),
            })
            .await
    }

    /// Tries a candidate click position: clicks once and watches the channel
    /// for the bridge's calibration message. On success the position is
    /// pinned as the single click target.
    pub async fn probe(&self, point: ScreenPoint) -> RelayResult<bool> {
        let _flow = self.flow.lock().await;
        self.actuator.send(ActuatorCommand::SaveClipboard).await?;
        self.actuator
            .send(ActuatorCommand::SetClipboard {
                data: String::new(),
            })
            .await?;

        let found = self.probe_once(point).await;
        self.restore_channel().await;

        match found {
            Ok(true) => {
                self.session.lock().await.targets = Some(ClickTargets::Single(point));
                info!(x = point.x, y = point.y, "calibration message observed, target pinned");
                Ok(true)
            }
            Ok(false) => {
                debug!(x = point.x, y = point.y, "no calibration message at candidate position");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn probe_once(&self, point: ScreenPoint) -> RelayResult<bool> {
        self.click_burst(point).await?;
        let deadline = Instant::now() + 2 * self.config.retrigger_interval();
        while Instant::now() < deadline {
            sleep(self.config.poll_interval()).await;
            let blob = self
                .actuator
                .read_clipboard(self.config.actuator_reply_timeout())
                .await?;
            if matches!(
                message::decode(&blob),
                Ok(Some(Message::Calibration { .. }))
            ) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Relays one request through the channel and waits for its response.
    ///
    /// Serialized per coordinator: concurrent callers queue behind the
    /// in-flight exchange. The channel snapshot is restored on every exit
    /// path, including timeout and actuator failure.
    pub async fn execute(&self, action: Action, payload: Value) -> RelayResult<Message> {
        let _flow = self.flow.lock().await;

        let targets = {
            let session = self.session.lock().await;
            session.targets.ok_or(RelayError::NotCalibrated)?
        };

        let request = Message::request(action, payload);
        let encoded = message::encode(&request)?;
        let handle = self.table.submit(&request).await?;

        {
            let mut session = self.session.lock().await;
            session.processing = true;
            session.stats.requests_sent += 1;
        }
        info!(id = request.id(), action = %action, "starting clipboard exchange");

        let outcome = self.run_exchange(&request, &encoded, targets, handle).await;

        // Unconditional cleanup: stop clicking and put the channel back the
        // way we found it, whatever the outcome.
        self.restore_channel().await;
        let _ = self.progress_tx.send(None);

        let mut session = self.session.lock().await;
        session.processing = false;
        match &outcome {
            Ok(response) => {
                session.stats.responses_received += 1;
                info!(id = response.id(), "exchange resolved");
            }
            Err(e) => {
                session.stats.errors += 1;
                warn!(id = request.id(), error = %e, "exchange failed");
            }
        }
        outcome
    }

    async fn run_exchange(
        &self,
        request: &Message,
        encoded: &str,
        targets: ClickTargets,
        mut handle: ResponseHandle,
    ) -> RelayResult<Message> {
        let id = request.id().to_string();

        if let Err(e) = self.publish(encoded, targets).await {
            // Never happened on the wire; drop the entry and fail directly.
            self.table.abort(&id).await;
            return Err(e);
        }

        // First poll and re-trigger fire after one full period; the initial
        // trigger was just issued by publish().
        let mut poll = interval_at(
            Instant::now() + self.config.poll_interval(),
            self.config.poll_interval(),
        );
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut retrigger = interval_at(
            Instant::now() + self.config.retrigger_interval(),
            self.config.retrigger_interval(),
        );
        retrigger.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let deadline = sleep(self.config.request_timeout());
        tokio::pin!(deadline);

        let mut acked = false;
        loop {
            tokio::select! {
                outcome = &mut handle => {
                    return outcome.map_err(|_| {
                        RelayError::Correlation("completion handle dropped".into())
                    })?;
                }
                () = &mut deadline => {
                    if self.table.expire(&id).await {
                        return Err(RelayError::Timeout(id));
                    }
                    // Lost the race to a resolve; re-arm the deadline and let
                    // the handle arm collect the outcome on the next pass.
                    deadline
                        .as_mut()
                        .reset(Instant::now() + self.config.request_timeout());
                }
                _ = poll.tick() => {
                    if let Err(e) = self.poll_channel(&id, &mut acked).await {
                        // A missed actuator reply is not fatal; the deadline
                        // bounds how long we keep trying.
                        debug!(error = %e, "channel poll failed");
                    }
                }
                _ = retrigger.tick() => {
                    if let Err(e) = self.trigger_clicks(targets).await {
                        warn!(error = %e, "click re-trigger failed");
                    }
                    let retries = self.table.record_retry(&id).await;
                    debug!(id = %id, retries, "click trigger re-issued");
                }
            }
        }
    }

    /// Snapshot the channel, publish the framed request, and issue the
    /// initial click trigger.
    async fn publish(&self, encoded: &str, targets: ClickTargets) -> RelayResult<()> {
        self.actuator.send(ActuatorCommand::SaveClipboard).await?;
        self.actuator.send(ActuatorCommand::SaveMouse).await?;
        sleep(self.config.settle_delay()).await;

        self.actuator
            .send(ActuatorCommand::SetClipboard {
                data: encoded.to_string(),
            })
            .await?;
        sleep(self.config.settle_delay()).await;

        self.trigger_clicks(targets).await
    }

    async fn trigger_clicks(&self, targets: ClickTargets) -> RelayResult<()> {
        match targets {
            ClickTargets::Single(point) => self.click_burst(point).await,
            ClickTargets::ReadWrite { read, write } => {
                self.click_burst(read).await?;
                sleep(self.config.settle_delay()).await;
                self.click_burst(write).await
            }
        }
    }

    async fn click_burst(&self, point: ScreenPoint) -> RelayResult<()> {
        self.actuator
            .send(ActuatorCommand::ClickLoop {
                x: point.x,
                y: point.y,
                interval: self.config.click_interval_ms,
                max_duration: self.config.click_burst_ms,
            })
            .await
    }

    /// Reads the channel once and classifies what it holds.
    async fn poll_channel(&self, in_flight: &str, acked: &mut bool) -> RelayResult<()> {
        let blob = self
            .actuator
            .read_clipboard(self.config.actuator_reply_timeout())
            .await?;

        match message::decode(&blob) {
            Ok(Some(Message::Ack { id, .. })) => {
                if id == in_flight && !*acked {
                    *acked = true;
                    info!(id = %id, "peer acknowledged request");
                }
            }
            Ok(Some(progress @ Message::Progress { .. })) => {
                if !message::verify(&progress) {
                    warn!(id = progress.id(), "progress checksum mismatch, forwarding anyway");
                }
                if let Message::Progress { id, payload, .. } = progress {
                    if id == in_flight {
                        debug!(chars = payload.accumulated.len(), "progress update");
                        let _ = self.progress_tx.send(Some(payload));
                    }
                }
            }
            Ok(Some(response @ Message::Response { .. })) => {
                if !message::verify(&response) {
                    warn!(id = response.id(), "response checksum mismatch, forwarding anyway");
                }
                let id = response.id().to_string();
                if self.table.resolve(&id, response).await {
                    info!(id = %id, "response received");
                } else {
                    // Duplicate-click artifact or a stale response from an
                    // earlier exchange.
                    debug!(id = %id, "response for unknown or settled request, ignoring");
                }
            }
            // Our own request (or a calibration leftover) still occupies the
            // channel.
            Ok(Some(_)) => {}
            // Nothing framed yet.
            Ok(None) => {}
            Err(e) => warn!(error = %e, "unparseable framed channel content"),
        }
        Ok(())
    }

    async fn restore_channel(&self) {
        for command in [
            ActuatorCommand::StopClicking,
            ActuatorCommand::RestoreClipboard,
            ActuatorCommand::RestoreMouse,
        ] {
            if let Err(e) = self.actuator.send(command).await {
                warn!(error = %e, "channel restore command failed");
            }
        }
    }
}
