use std::sync::Arc;
use std::time::Duration;

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use tracing::{debug, info};

use crate::application::fanout::{FanoutEvent, FanoutQueue, FanoutWorker, QueueError};
use crate::application::jobs::{FANOUT_JOB_NAMESPACE, FanoutJobContext, process_fanout_job};
use crate::infra::error::InfraError;
use crate::lifecycle::ShutdownSignal;

const FANOUT_JOB_PRIORITY: i32 = 0;

/// Producer that writes fan-out events as apalis jobs.
#[derive(Clone)]
pub struct PostgresFanoutQueue {
    pool: PgPool,
    max_attempts: i32,
}

impl PostgresFanoutQueue {
    pub fn new(pool: PgPool, max_attempts: u32) -> Self {
        Self {
            pool,
            max_attempts: i32::try_from(max_attempts).unwrap_or(i32::MAX),
        }
    }
}

#[async_trait]
impl FanoutQueue for PostgresFanoutQueue {
    async fn enqueue(&self, event: FanoutEvent) -> Result<(), QueueError> {
        let payload =
            serde_json::to_value(event).map_err(|err| QueueError::Encode(err.to_string()))?;

        let job_id: String = sqlx::query_scalar(
            r#"
            SELECT (apalis.push_job($1, $2::json, 'Pending', now(), $3, $4)).id
            "#,
        )
        .bind(FANOUT_JOB_NAMESPACE)
        .bind(payload)
        .bind(self.max_attempts)
        .bind(FANOUT_JOB_PRIORITY)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| QueueError::Unavailable(err.to_string()))?;

        debug!(
            job_id,
            publication_id = %event.publication_id,
            "fan-out job enqueued"
        );
        Ok(())
    }
}

/// Create the apalis job tables and functions.
pub async fn setup_job_storage(pool: &PgPool) -> Result<(), InfraError> {
    PostgresStorage::setup(pool)
        .await
        .map_err(|err| InfraError::queue(format!("failed to set up job storage: {err}")))
}

/// Run the apalis fan-out worker until `shutdown` fires.
///
/// Failed jobs are retried by the storage until their `max_attempts` is used up.
pub async fn run_postgres_consumers(
    pool: PgPool,
    worker: Arc<FanoutWorker>,
    concurrency: usize,
    mut shutdown: ShutdownSignal,
    grace: Duration,
) -> Result<(), InfraError> {
    let storage: PostgresStorage<FanoutEvent> =
        PostgresStorage::new_with_config(pool, ApalisSqlConfig::new(FANOUT_JOB_NAMESPACE));

    let fanout_worker = WorkerBuilder::new("fanout-worker")
        .concurrency(concurrency.max(1))
        .data(FanoutJobContext { worker })
        .backend(storage)
        .build_fn(process_fanout_job);

    info!(concurrency, "fan-out job monitor starting");
    Monitor::new()
        .register(fanout_worker)
        .shutdown_timeout(grace)
        .run_with_signal(async move {
            shutdown.wait().await;
            Ok(())
        })
        .await
        .map_err(|err| InfraError::queue(format!("fan-out job monitor stopped: {err}")))
}
