use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::store::{IdentityStore, SweepReport};

/// Periodically release stale invite reservations and purge old
/// confirmations.
pub async fn run_sweeper(store: Arc<dyn IdentityStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        sweep_once(store.as_ref()).await;
    }
}

pub async fn sweep_once(store: &dyn IdentityStore) -> Option<SweepReport> {
    match store.sweep_expired(Utc::now()).await {
        Ok(report) => {
            if report != SweepReport::default() {
                tracing::info!(
                    released_reservations = report.released_reservations,
                    purged_confirmations = report.purged_confirmations,
                    repaired_confirmations = report.repaired_confirmations,
                    "Reconciliation sweep completed"
                );
            }
            Some(report)
        }
        Err(e) => {
            tracing::error!(error = %e, "Reconciliation sweep failed");
            None
        }
    }
}
