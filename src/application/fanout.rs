//! Fan-out events and the worker that applies them to the recent-posts cache.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::application::repos::{PublicationsRepo, RepoError};
use crate::cache::{CacheError, RecentInsert, RecentPostsCache};
use crate::domain::entities::PublicationRecord;
use crate::domain::types::{PublicationId, TimelineKey, UserId};

pub(crate) const METRIC_FANOUT_INSERT: &str = "murmur_fanout_insert_total";
pub(crate) const METRIC_FANOUT_DUPLICATE: &str = "murmur_fanout_duplicate_total";
pub(crate) const METRIC_FANOUT_EVICT: &str = "murmur_fanout_evict_total";
pub(crate) const METRIC_FANOUT_BACKFILL: &str = "murmur_fanout_backfill_total";
pub(crate) const METRIC_FANOUT_APPLY_MS: &str = "murmur_fanout_apply_ms";

/// "Publication created" notification carried by the fan-out queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutEvent {
    pub author_id: UserId,
    pub publication_id: PublicationId,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
}

impl FanoutEvent {
    pub fn timeline_key(&self) -> TimelineKey {
        TimelineKey::new(self.published_at, self.publication_id)
    }
}

impl From<&PublicationRecord> for FanoutEvent {
    fn from(record: &PublicationRecord) -> Self {
        Self {
            author_id: record.author_id,
            publication_id: record.id,
            published_at: record.published_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("fan-out queue unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode fan-out event: {0}")]
    Encode(String),
}

/// Producer side of the fan-out queue.
#[async_trait]
pub trait FanoutQueue: Send + Sync {
    async fn enqueue(&self, event: FanoutEvent) -> Result<(), QueueError>;
}

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("recent-posts cache rejected publication {publication_id}: {source}")]
    Cache {
        publication_id: PublicationId,
        #[source]
        source: CacheError,
    },
    #[error("failed to read recent publications while applying {publication_id}: {source}")]
    Repo {
        publication_id: PublicationId,
        #[source]
        source: RepoError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutOutcome {
    Inserted { evicted: usize },
    Duplicate,
    /// Older than the cached window; reads reach it through the store.
    OutsideWindow,
    /// The author had no cached list; it was seeded from the store.
    Backfilled { cached: usize },
}

/// Applies fan-out events. Safe to run on several consumers at once and to
/// see the same event more than once.
#[derive(Clone)]
pub struct FanoutWorker {
    recent: RecentPostsCache,
    publications: Arc<dyn PublicationsRepo>,
}

impl FanoutWorker {
    pub fn new(recent: RecentPostsCache, publications: Arc<dyn PublicationsRepo>) -> Self {
        Self {
            recent,
            publications,
        }
    }

    #[instrument(
        skip(self, event),
        fields(author_id = %event.author_id, publication_id = %event.publication_id)
    )]
    pub async fn handle(&self, event: &FanoutEvent) -> Result<FanoutOutcome, FanoutError> {
        let started = Instant::now();
        let cache_error = |source: CacheError| FanoutError::Cache {
            publication_id: event.publication_id,
            source,
        };
        let inserted = self
            .recent
            .insert(event.author_id, event.timeline_key())
            .await
            .map_err(cache_error)?;

        let evicted = inserted.evicted().len();
        if evicted > 0 {
            counter!(METRIC_FANOUT_EVICT).increment(evicted as u64);
        }

        let outcome = match inserted {
            RecentInsert::Inserted { .. } => {
                counter!(METRIC_FANOUT_INSERT).increment(1);
                debug!(evicted, "publication added to recent posts");
                FanoutOutcome::Inserted { evicted }
            }
            RecentInsert::Duplicate { .. } => {
                counter!(METRIC_FANOUT_DUPLICATE).increment(1);
                debug!("duplicate fan-out delivery ignored");
                FanoutOutcome::Duplicate
            }
            RecentInsert::OutsideWindow => {
                counter!(METRIC_FANOUT_EVICT).increment(1);
                debug!("publication older than cached window");
                FanoutOutcome::OutsideWindow
            }
            RecentInsert::Missing => {
                let cached = self.backfill(event).await?;
                counter!(METRIC_FANOUT_BACKFILL).increment(1);
                debug!(cached, "recent posts seeded from publication store");
                FanoutOutcome::Backfilled { cached }
            }
        };
        histogram!(METRIC_FANOUT_APPLY_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        if let Err(err) = self.publications.mark_fanout_applied(event.publication_id).await {
            // The sweeper redelivers it; applying again is a duplicate.
            warn!(error = %err, "failed to clear pending fan-out flag");
        }
        Ok(outcome)
    }

    async fn backfill(&self, event: &FanoutEvent) -> Result<usize, FanoutError> {
        let limit = self.recent.limit();
        let newest = self
            .publications
            .query_recent_publications(
                event.author_id,
                None,
                u32::try_from(limit).unwrap_or(u32::MAX),
            )
            .await
            .map_err(|source| FanoutError::Repo {
                publication_id: event.publication_id,
                source,
            })?;
        let complete = newest.len() < limit;
        let keys = newest.iter().map(PublicationRecord::timeline_key).collect();

        let cache_error = |source: CacheError| FanoutError::Cache {
            publication_id: event.publication_id,
            source,
        };
        let cached = self
            .recent
            .backfill(event.author_id, keys, complete)
            .await
            .map_err(cache_error)?;
        // The read may predate the commit this event announces.
        self.recent
            .insert(event.author_id, event.timeline_key())
            .await
            .map_err(cache_error)?;
        Ok(cached)
    }
}
