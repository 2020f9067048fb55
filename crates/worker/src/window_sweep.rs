//! Periodic eviction of idle detector windows.
//!
//! Per-patient windows are created on first sight of a patient and code.
//! This task drops the ones that have not seen a reading for the configured
//! idle period, so memory follows the active patient set.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::processor::ObservationProcessor;

/// Longest pause between sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Sweep interval for a given idle period.
pub fn sweep_interval(max_idle: Duration) -> Duration {
    max_idle.min(MAX_SWEEP_INTERVAL).max(Duration::from_millis(1))
}

/// Run the sweep loop until `cancel` is triggered.
pub async fn run(
    processor: Arc<ObservationProcessor>,
    max_idle: Duration,
    cancel: CancellationToken,
) {
    let period = sweep_interval(max_idle);
    tracing::info!(
        max_idle_secs = max_idle.as_secs(),
        interval_ms = period.as_millis() as u64,
        "Detector window sweep started"
    );

    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Detector window sweep stopping");
                break;
            }
            _ = interval.tick() => {
                let evicted = processor.detector().evict_idle(max_idle);
                if evicted > 0 {
                    tracing::info!(
                        evicted,
                        remaining = processor.detector().window_count(),
                        "Evicted idle detector windows"
                    );
                }
            }
        }
    }
}
