//! Periodic housekeeping

use crate::router::EventRouter;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// What one maintenance pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Expired dedup keys
    pub swept: usize,
    /// Idle alert states
    pub decayed: usize,
    /// Notification cooldown entries past their cooldown
    pub pruned: usize,
}

/// Run [`EventRouter::run_maintenance`] every `maintenance_interval`.
///
/// The task holds a weak reference and exits once the router is dropped.
pub fn spawn_maintenance(router: &Arc<EventRouter>) -> JoinHandle<()> {
    let period = router.config().maintenance_interval();
    let router = Arc::downgrade(router);

    tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "Starting maintenance loop");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(router) = router.upgrade() else {
                break;
            };
            let report = router.run_maintenance();
            if report != MaintenanceReport::default() {
                info!(
                    swept = report.swept,
                    decayed = report.decayed,
                    pruned = report.pruned,
                    "Maintenance pass"
                );
            } else {
                debug!("Maintenance pass, nothing to remove");
            }
        }

        info!("Maintenance loop stopped");
    })
}
