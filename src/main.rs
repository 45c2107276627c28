use std::{process, sync::Arc};

use murmur::{
    application::{
        error::AppError,
        fanout::{FanoutQueue, FanoutWorker},
        feed::{FeedConfig, FeedService},
        follows::FollowService,
        publish::PublicationService,
        users::UserService,
    },
    cache::{CacheConfig, CacheStore, FollowingSetCache, InMemoryCacheStore, RecentPostsCache},
    config::{self, FanoutBackend},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, ApiState},
        queue::{
            MemoryFanoutQueue, PostgresFanoutQueue, SweepSchedule, run_memory_consumer,
            run_pending_sweeper, run_postgres_consumers, setup_job_storage,
        },
        telemetry,
    },
    lifecycle::Lifecycle,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
        config::Command::Replay(args) => run_replay(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    prepare_schema(&repositories, settings.fanout.backend).await?;

    let cache_config = CacheConfig::from(&settings.cache);
    let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new(&cache_config));
    let recent = RecentPostsCache::new(store.clone(), cache_config.recent_posts_limit_non_zero());
    let fanout_worker = Arc::new(FanoutWorker::new(recent.clone(), repositories.clone()));

    let lifecycle = Lifecycle::new();
    let queue = start_fanout_consumers(&lifecycle, &settings, &repositories, fanout_worker);

    let publications = PublicationService::new(repositories.clone(), repositories.clone(), queue);
    let fanout = &settings.fanout;
    lifecycle.spawn(
        "fanout-pending-sweeper",
        run_pending_sweeper(
            publications.clone(),
            SweepSchedule {
                interval: fanout.sweep_interval,
                grace: fanout.pending_grace,
                batch: fanout.sweep_batch.get(),
            },
            lifecycle.signal(),
        ),
    );

    let follows = FollowService::new(repositories.clone(), FollowingSetCache::new(store));
    let state = ApiState {
        users: UserService::new(repositories.clone()),
        publications,
        feed: FeedService::new(
            follows.clone(),
            recent,
            repositories.clone(),
            FeedConfig::from(&settings.feed),
        ),
        follows,
        health: repositories.clone(),
    };

    let result = serve_http(&settings, state).await;

    info!(
        grace_secs = settings.server.graceful_shutdown.as_secs(),
        "draining fan-out consumers"
    );
    lifecycle.shutdown(settings.server.graceful_shutdown).await;
    repositories.close().await;
    result
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    prepare_schema(&repositories, FanoutBackend::Postgres).await?;
    info!(target = "murmur::migrate", "schema is up to date");
    repositories.close().await;
    Ok(())
}

async fn run_replay(settings: config::Settings, args: config::ReplayArgs) -> Result<(), AppError> {
    if settings.fanout.backend != FanoutBackend::Postgres {
        return Err(AppError::validation(
            "replay requires fanout.backend = postgres; the in-memory queue is process-local",
        ));
    }

    let repositories = init_repositories(&settings).await?;
    let queue: Arc<dyn FanoutQueue> = Arc::new(PostgresFanoutQueue::new(
        repositories.pool().clone(),
        settings.fanout.max_attempts.get(),
    ));
    let publications = PublicationService::new(repositories.clone(), repositories.clone(), queue);

    let report = publications
        .redeliver_since(args.since, args.limit)
        .await
        .map_err(|err| AppError::unexpected(format!("replay failed: {err}")))?;
    repositories.close().await;

    if report.failed > 0 {
        return Err(AppError::unexpected(format!(
            "{} of {} fan-out events could not be enqueued",
            report.failed, report.scanned
        )));
    }
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn prepare_schema(
    repositories: &PostgresRepositories,
    backend: FanoutBackend,
) -> Result<(), AppError> {
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    if backend == FanoutBackend::Postgres {
        setup_job_storage(repositories.pool()).await?;
    }
    Ok(())
}

/// Spawn fan-out consumers under `lifecycle` and return the matching producer.
fn start_fanout_consumers(
    lifecycle: &Lifecycle,
    settings: &config::Settings,
    repositories: &PostgresRepositories,
    worker: Arc<FanoutWorker>,
) -> Arc<dyn FanoutQueue> {
    let fanout = &settings.fanout;
    match fanout.backend {
        FanoutBackend::Postgres => {
            let pool = repositories.pool().clone();
            let concurrency = fanout.concurrency.get();
            let shutdown = lifecycle.signal();
            let grace = settings.server.graceful_shutdown;
            lifecycle.spawn("fanout-monitor", async move {
                if let Err(err) =
                    run_postgres_consumers(pool, worker, concurrency, shutdown, grace).await
                {
                    error!(error = %err, "fan-out job monitor failed");
                }
            });
            Arc::new(PostgresFanoutQueue::new(
                repositories.pool().clone(),
                fanout.max_attempts.get(),
            ))
        }
        FanoutBackend::Memory => {
            warn!(
                "fan-out uses the in-memory queue; queued events are lost on restart and \
                 re-enqueued by the pending sweeper"
            );
            let queue = Arc::new(MemoryFanoutQueue::new(fanout.max_attempts.get()));
            for _ in 0..fanout.concurrency.get() {
                lifecycle.spawn(
                    "memory-fanout-consumer",
                    run_memory_consumer(
                        queue.clone(),
                        worker.clone(),
                        lifecycle.signal(),
                        fanout.poll_interval,
                    ),
                );
            }
            queue
        }
    }
}

async fn serve_http(settings: &config::Settings, state: ApiState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(addr = %settings.server.addr, "murmur listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown requested");
}
