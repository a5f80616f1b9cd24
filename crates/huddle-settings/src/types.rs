//! Settings types.
//!
//! All structs use `#[serde(default)]` so a partial settings file only has
//! to name the keys it overrides.

use std::path::PathBuf;
use std::time::Duration;

use huddle_core::constants;
use serde::{Deserialize, Serialize};

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HuddleSettings {
    /// Hub process settings.
    pub server: ServerSettings,
    /// Terminal client settings.
    pub client: ClientSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Hub network and liveness settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP + WebSocket port.
    pub port: u16,
    /// Liveness sweep period in milliseconds.
    pub sweep_interval_ms: u64,
    /// Per-connection outbound queue capacity (frames).
    pub send_queue_capacity: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            sweep_interval_ms: millis(constants::LIVENESS_SWEEP_INTERVAL),
            send_queue_capacity: 256,
            max_message_size: 1024 * 1024,
        }
    }
}

impl ServerSettings {
    /// Sweep period as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Reconnection policy knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Whether the client reconnects after an unexpected close.
    pub enabled: bool,
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
    /// Linear backoff step in milliseconds.
    pub step_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: constants::RECONNECT_MAX_ATTEMPTS,
            step_ms: constants::RECONNECT_STEP_MS,
            max_delay_ms: constants::RECONNECT_MAX_DELAY_MS,
        }
    }
}

/// Terminal client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Base HTTP URL of the hub (the WebSocket URL is derived from it).
    pub server_url: String,
    /// Application `ping` period in milliseconds.
    pub probe_interval_ms: u64,
    /// Reconnection policy.
    pub reconnect: ReconnectSettings,
    /// Age after which a remembered name is force-removed, in milliseconds.
    pub stale_after_ms: u64,
    /// Client state file, relative to `~/.huddle` unless absolute.
    pub state_file: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            probe_interval_ms: millis(constants::CLIENT_PROBE_INTERVAL),
            reconnect: ReconnectSettings::default(),
            stale_after_ms: millis(constants::STALE_SESSION_AFTER),
            state_file: "client-state.json".to_string(),
        }
    }
}

impl ClientSettings {
    /// Probe period as a [`Duration`].
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Stale-name threshold as a [`Duration`].
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// Resolve the state file against `home_dir` (normally `~/.huddle`).
    pub fn state_path(&self, home_dir: &std::path::Path) -> PathBuf {
        let path = PathBuf::from(&self.state_file);
        if path.is_absolute() {
            path
        } else {
            home_dir.join(path)
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of pretty output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
