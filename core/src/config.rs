use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{RelayError, RelayResult};

/// Timing and transport settings for the coordinator daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Command line used to spawn the actuator subprocess.
    pub actuator_command: Vec<String>,
    /// Address of the HTTP front door.
    pub http_addr: String,
    /// How often the channel is polled while a request is in flight.
    pub poll_interval_ms: u64,
    /// Delay between individual clicks inside one actuator click loop.
    pub click_interval_ms: u64,
    /// Duration of one click loop issued to the actuator.
    pub click_burst_ms: u64,
    /// Cadence at which the click trigger is re-issued while polling.
    pub retrigger_interval_ms: u64,
    /// Overall deadline for a request to produce a matching response.
    pub request_timeout_ms: u64,
    /// How long to wait for the actuator to answer a single command.
    pub actuator_reply_timeout_ms: u64,
    /// Pause between channel-mutating steps so the actuator can keep up.
    pub settle_delay_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            actuator_command: vec!["java".into(), "-jar".into(), "agent.jar".into()],
            http_addr: "127.0.0.1:5555".into(),
            poll_interval_ms: 500,
            click_interval_ms: 100,
            click_burst_ms: 2_000,
            retrigger_interval_ms: 2_500,
            request_timeout_ms: 30_000,
            actuator_reply_timeout_ms: 2_000,
            settle_delay_ms: 100,
        }
    }
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retrigger_interval(&self) -> Duration {
        Duration::from_millis(self.retrigger_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn actuator_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.actuator_reply_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Settings for the UI-side bridge: where the upstream chat backend lives
/// and how responses are presented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub upstream_base_url: String,
    pub auth_token: String,
    pub model: String,
    pub temperature: f32,
    pub session_id: String,
    /// How long a terminal state stays visible before returning to ready.
    pub display_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: "http://127.0.0.1:5556".into(),
            auth_token: "mock-token-12345".into(),
            model: "claude-3-opus".into(),
            temperature: 0.7,
            session_id: "11111111111111111111".into(),
            display_delay_ms: 2_000,
        }
    }
}

impl BridgeConfig {
    pub fn display_delay(&self) -> Duration {
        Duration::from_millis(self.display_delay_ms)
    }
}

/// Unified on-disk configuration for the whole suite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl RelayConfig {
    /// Loads configuration from a file if it exists, otherwise returns the
    /// default config.
    pub fn load_from_file(path: &Path) -> RelayResult<Self> {
        if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                RelayError::Config(format!("Failed to read config file: {}", e))
            })?;
            toml::from_str(&content)
                .map_err(|e| RelayError::Config(format!("Failed to parse config file: {}", e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Saves configuration to a file, creating parent directories as needed.
    pub fn save_to_file(&self, path: &Path) -> RelayResult<()> {
        let content = toml::to_string(self)
            .map_err(|e| RelayError::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                RelayError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
        fs::write(path, content)
            .map_err(|e| RelayError::Config(format!("Failed to write config file: {}", e)))
    }
}

/// Default config file path under the user's config directory.
pub fn default_config_file() -> RelayResult<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| RelayError::Config("Could not determine home directory".to_string()))?;
    Ok(home_dir.join(".config").join("clipwire").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = RelayConfig::load_from_file(Path::new("/nonexistent/clipwire.toml")).unwrap();
        assert_eq!(config.coordinator.poll_interval_ms, 500);
        assert_eq!(config.bridge.model, "claude-3-opus");
    }

    #[test]
    fn toml_round_trip_preserves_timings() {
        let mut config = RelayConfig::default();
        config.coordinator.request_timeout_ms = 12_345;
        let text = toml::to_string(&config).unwrap();
        let parsed: RelayConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.coordinator.request_timeout_ms, 12_345);
    }
}
