//! Background task revoking expired leases.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use super::LeaseManager;

/// Periodically run [`LeaseManager::tidy_expired`] until the task is aborted.
pub fn spawn_reaper(manager: Arc<LeaseManager>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = every.as_secs(), "Lease reaper started");

        loop {
            interval.tick().await;
            match manager.tidy_expired().await {
                Ok(report) if report.failed > 0 => {
                    error!(failed = report.failed, revoked = report.revoked, "Some expired leases could not be revoked");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Lease reaper pass failed");
                }
            }
        }
    })
}
