//! Periodic liveness sweep over every open connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::hub::Hub;

/// Outcome of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The monitor was cancelled externally.
    Cancelled,
}

/// Sweep `hub` every `interval` until `cancel` fires.
///
/// The first sweep happens one full interval after start, so a freshly
/// opened connection always gets one probe before it can be judged.
pub async fn run_liveness_monitor(
    hub: Arc<Hub>,
    interval: Duration,
    cancel: CancellationToken,
) -> MonitorExit {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    info!(interval_ms = interval.as_millis(), "liveness monitor started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = hub.sweep();
                debug!(
                    probed = report.probed,
                    terminated = report.terminated.len(),
                    evicted = report.evicted.len(),
                    "liveness sweep"
                );
            }
            () = cancel.cancelled() => {
                info!("liveness monitor stopped");
                return MonitorExit::Cancelled;
            }
        }
    }
}
