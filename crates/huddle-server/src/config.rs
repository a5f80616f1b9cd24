//! Server configuration.

use std::time::Duration;

use huddle_core::constants;
use huddle_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the hub server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Period of the liveness sweep.
    pub sweep_interval: Duration,
    /// Per-connection outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            sweep_interval: constants::LIVENESS_SWEEP_INTERVAL,
            send_queue_capacity: 256,
            max_message_size: 1024 * 1024,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            sweep_interval: settings.sweep_interval(),
            send_queue_capacity: settings.send_queue_capacity,
            max_message_size: settings.max_message_size,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
