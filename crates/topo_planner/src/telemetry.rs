use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::state::PlannerState;

/// Publishes one `DestinationDebug` record per destination every `period`
/// and mirrors the totals into the Prometheus gauges.
pub async fn run_destination_telemetry(
    state: Arc<PlannerState>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let topic = state.topics.destinations_log.clone();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                let records = state.destinations.snapshot();
                let available = records.iter().filter(|d| d.available).count();
                let max_idleness = records.iter().map(|d| d.idleness).fold(0.0, f64::max);
                state.metrics.update_destinations(available, max_idleness);

                for record in &records {
                    state.bus.publish(&topic, record);
                }
                tracing::trace!(available, max_idleness, "Destination telemetry published");
            }
        }
    }
    tracing::debug!("Destination telemetry stopped");
}
