//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used by `GET /metrics`. Fails if another recorder is
/// already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants.

/// Duplex connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Duplex connections closed for any reason (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Currently open duplex connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram, seconds).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Frames dropped because a recipient queue was full (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Inbound payloads that failed to decode (counter).
pub const WS_MALFORMED_TOTAL: &str = "ws_malformed_total";
/// Chat payloads fanned out (counter).
pub const CHAT_MESSAGES_TOTAL: &str = "chat_messages_total";
/// Successful name claims (counter).
pub const CLAIMS_TOTAL: &str = "registry_claims_total";
/// Claims refused because the name is online (counter).
pub const CLAIM_CONFLICTS_TOTAL: &str = "registry_claim_conflicts_total";
/// Attach attempts refused (counter).
pub const IDENTITY_REJECTIONS_TOTAL: &str = "identity_rejections_total";
/// Connections pruned by the liveness sweep (counter).
pub const LIVENESS_EVICTIONS_TOTAL: &str = "liveness_evictions_total";
/// Registry rows (gauge).
pub const USERS_REGISTERED: &str = "users_registered";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_names_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_BROADCAST_DROPS_TOTAL,
            WS_MALFORMED_TOTAL,
            CHAT_MESSAGES_TOTAL,
            CLAIMS_TOTAL,
            CLAIM_CONFLICTS_TOTAL,
            IDENTITY_REJECTIONS_TOTAL,
            LIVENESS_EVICTIONS_TOTAL,
            USERS_REGISTERED,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
