use apalis::prelude::{Data, Error as ApalisError};
use tracing::{info, warn};

use crate::application::fanout::{FanoutEvent, FanoutOutcome};

use super::context::{FanoutJobContext, job_failed};

/// Apply one fan-out job. A cache or store failure fails the job so it is
/// redelivered.
pub async fn process_fanout_job(
    event: FanoutEvent,
    context: Data<FanoutJobContext>,
) -> Result<(), ApalisError> {
    match context.worker.handle(&event).await {
        Ok(FanoutOutcome::Inserted { evicted }) => {
            info!(
                target = "application::jobs::process_fanout_job",
                author_id = %event.author_id,
                publication_id = %event.publication_id,
                evicted,
                "publication fanned out"
            );
            Ok(())
        }
        Ok(FanoutOutcome::Backfilled { cached }) => {
            info!(
                target = "application::jobs::process_fanout_job",
                author_id = %event.author_id,
                publication_id = %event.publication_id,
                cached,
                "recent posts seeded for author"
            );
            Ok(())
        }
        Ok(FanoutOutcome::Duplicate | FanoutOutcome::OutsideWindow) => Ok(()),
        Err(err) => {
            warn!(
                target = "application::jobs::process_fanout_job",
                author_id = %event.author_id,
                publication_id = %event.publication_id,
                error = %err,
                "fan-out failed; job will be retried"
            );
            Err(job_failed(err))
        }
    }
}
