use std::sync::Arc;

use apalis::prelude::Error as ApalisError;

use crate::application::fanout::FanoutWorker;

/// Job type recorded in `apalis.jobs` for fan-out events.
pub const FANOUT_JOB_NAMESPACE: &str = "murmur::fanout";

/// Shared context passed to fan-out job workers.
#[derive(Clone)]
pub struct FanoutJobContext {
    pub worker: Arc<FanoutWorker>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`] so apalis records the
/// attempt and the job is retried while attempts remain.
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
