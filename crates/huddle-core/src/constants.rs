//! Timing and limit defaults shared by server and client.

use std::time::Duration;

/// Current version (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Period of the server-side liveness sweep.
pub const LIVENESS_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Period of the client's application-level `ping`.
pub const CLIENT_PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Reconnect attempts allowed before the client gives up.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// Linear backoff step per reconnect attempt, in milliseconds.
pub const RECONNECT_STEP_MS: u64 = 2_000;

/// Upper bound on a single reconnect delay, in milliseconds.
pub const RECONNECT_MAX_DELAY_MS: u64 = 10_000;

/// A remembered name older than this is treated as abandoned.
pub const STALE_SESSION_AFTER: Duration = Duration::from_secs(5 * 60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_faster_than_sweep() {
        assert!(CLIENT_PROBE_INTERVAL < LIVENESS_SWEEP_INTERVAL);
    }

    #[test]
    fn backoff_cap_is_reached_before_giving_up() {
        assert!(RECONNECT_STEP_MS * u64::from(RECONNECT_MAX_ATTEMPTS) >= RECONNECT_MAX_DELAY_MS);
    }
}
