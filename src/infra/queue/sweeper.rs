use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::application::publish::PublicationService;
use crate::lifecycle::ShutdownSignal;

/// How often and how far back the pending sweeper looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSchedule {
    pub interval: Duration,
    /// Publications younger than this are left to their first delivery.
    pub grace: Duration,
    pub batch: u32,
}

/// Re-enqueue publications whose fan-out never completed, until shutdown.
pub async fn run_pending_sweeper(
    publications: PublicationService,
    schedule: SweepSchedule,
    mut shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep(schedule.interval) => {}
        }

        let older_than = OffsetDateTime::now_utc() - schedule.grace;
        match publications
            .redeliver_pending(older_than, schedule.batch)
            .await
        {
            Ok(report) if report.scanned > 0 => debug!(
                scanned = report.scanned,
                enqueued = report.enqueued,
                failed = report.failed,
                "pending fan-out swept"
            ),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "pending fan-out sweep failed"),
        }
    }

    info!("pending fan-out sweeper stopped");
}
