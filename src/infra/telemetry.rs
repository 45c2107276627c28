use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::{fanout, feed, publish};
use crate::cache::METRIC_CACHE_KEY_EVICT;
use crate::config::{LogFormat, LoggingSettings};
use crate::infra::queue::METRIC_MEMORY_QUEUE_DEPTH;

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            fanout::METRIC_FANOUT_INSERT,
            Unit::Count,
            "Publications inserted into an author's recent-posts list."
        );
        describe_counter!(
            fanout::METRIC_FANOUT_DUPLICATE,
            Unit::Count,
            "Fan-out deliveries ignored because the publication was already cached."
        );
        describe_counter!(
            fanout::METRIC_FANOUT_EVICT,
            Unit::Count,
            "Entries evicted from, or kept out of, recent-posts lists by the per-author bound."
        );
        describe_counter!(
            fanout::METRIC_FANOUT_BACKFILL,
            Unit::Count,
            "Recent-posts lists seeded from the publication store on first delivery."
        );
        describe_histogram!(
            fanout::METRIC_FANOUT_APPLY_MS,
            Unit::Milliseconds,
            "Time to apply one fan-out event."
        );
        describe_counter!(
            feed::METRIC_FEED_CACHE_FALLBACK,
            Unit::Count,
            "Author timeline reads served by the durable store, by reason."
        );
        describe_counter!(
            feed::METRIC_FEED_PARTIAL,
            Unit::Count,
            "Feed pages returned with at least one author skipped."
        );
        describe_histogram!(
            feed::METRIC_FEED_READ_MS,
            Unit::Milliseconds,
            "Feed page assembly latency."
        );
        describe_counter!(
            publish::METRIC_PUBLISH_DEFERRED,
            Unit::Count,
            "Publications stored while the fan-out queue was unavailable."
        );
        describe_counter!(
            METRIC_CACHE_KEY_EVICT,
            Unit::Count,
            "Cache keys evicted by the key-count bound."
        );
        describe_gauge!(
            METRIC_MEMORY_QUEUE_DEPTH,
            Unit::Count,
            "Fan-out events waiting in the in-process queue."
        );
    });
}
