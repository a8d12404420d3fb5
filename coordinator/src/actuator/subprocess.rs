//! Long-lived actuator subprocess driven over line-delimited JSON.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use clipwire_core::errors::{RelayError, RelayResult};
use clipwire_ipc::actuator_messages::{self, ActuatorCommand, ActuatorEvent};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::Actuator;

const COMMAND_BUFFER_SIZE: usize = 32;
const EVENT_BUFFER_SIZE: usize = 64;
const RESTART_DELAY: Duration = Duration::from_secs(2);

/// Spawns the configured actuator command and keeps it running: commands
/// are forwarded to its stdin, stdout lines become [`ActuatorEvent`]s, and
/// an abnormal exit triggers a restart after a short delay.
pub struct SubprocessActuator {
    command_tx: mpsc::Sender<ActuatorCommand>,
    events_tx: broadcast::Sender<ActuatorEvent>,
}

impl SubprocessActuator {
    pub fn spawn(command: Vec<String>) -> RelayResult<Self> {
        if command.is_empty() {
            return Err(RelayError::Config("actuator command is empty".into()));
        }
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        tokio::spawn(supervise(command, command_rx, events_tx.clone()));
        Ok(Self {
            command_tx,
            events_tx,
        })
    }
}

#[async_trait]
impl Actuator for SubprocessActuator {
    async fn send(&self, command: ActuatorCommand) -> RelayResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| RelayError::Actuator("actuator task stopped".into()))
    }

    fn events(&self) -> broadcast::Receiver<ActuatorEvent> {
        self.events_tx.subscribe()
    }
}

enum ExitCause {
    /// The client half was dropped; shut the child down.
    Shutdown,
    Exited(Option<i32>),
}

async fn supervise(
    command: Vec<String>,
    mut command_rx: mpsc::Receiver<ActuatorCommand>,
    events_tx: broadcast::Sender<ActuatorEvent>,
) {
    loop {
        let mut child = match launch(&command) {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, program = %command[0], "failed to spawn actuator");
                tokio::time::sleep(RESTART_DELAY).await;
                continue;
            }
        };
        info!(program = %command[0], pid = ?child.id(), "actuator started");

        match run_io(&mut child, &mut command_rx, &events_tx).await {
            Ok(ExitCause::Shutdown) => {
                let _ = child.start_kill();
                break;
            }
            Ok(ExitCause::Exited(Some(0))) => {
                info!("actuator exited cleanly");
                break;
            }
            Ok(ExitCause::Exited(code)) => {
                warn!(?code, "actuator exited, restarting");
            }
            Err(e) => {
                error!(error = %e, "actuator io failed, restarting");
                let _ = child.start_kill();
            }
        }
        tokio::time::sleep(RESTART_DELAY).await;
    }
}

fn launch(command: &[String]) -> std::io::Result<Child> {
    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..]);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    cmd.spawn()
}

async fn run_io(
    child: &mut Child,
    command_rx: &mut mpsc::Receiver<ActuatorCommand>,
    events_tx: &broadcast::Sender<ActuatorEvent>,
) -> std::io::Result<ExitCause> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::new(ErrorKind::BrokenPipe, "actuator stdin missing"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::new(ErrorKind::BrokenPipe, "actuator stdout missing"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::new(ErrorKind::BrokenPipe, "actuator stderr missing"))?;

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stderr_open = true;

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(command) => {
                    debug!(cmd = command.name(), "forwarding command to actuator");
                    let line = actuator_messages::command_line(&command)
                        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.flush().await?;
                }
                None => return Ok(ExitCause::Shutdown),
            },
            line = stdout_lines.next_line() => match line? {
                Some(line) => match actuator_messages::parse_event(&line) {
                    Ok(event) => {
                        let _ = events_tx.send(event);
                    }
                    // The agent interleaves free-form log lines with protocol
                    // output; surface them instead of dropping.
                    Err(_) => info!("[actuator] {}", line.trim_end()),
                },
                None => {
                    let status = child.wait().await?;
                    return Ok(ExitCause::Exited(status.code()));
                }
            },
            line = stderr_lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => warn!("[actuator stderr] {}", line.trim_end()),
                Ok(None) | Err(_) => stderr_open = false,
            },
        }
    }
}
