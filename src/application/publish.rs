//! Publication ingest.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::application::fanout::{FanoutEvent, FanoutQueue};
use crate::application::repos::{
    CreatePublicationParams, PublicationsRepo, RepoError, UsersRepo,
};
use crate::domain::entities::PublicationRecord;
use crate::domain::error::DomainError;
use crate::domain::publications::PublicationText;
use crate::domain::types::{PublicationId, UserId, truncate_to_micros};

pub(crate) const METRIC_PUBLISH_DEFERRED: &str = "murmur_publish_deferred_total";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    InvalidPublication(#[from] DomainError),
    #[error("author {0} does not exist")]
    UnknownAuthor(UserId),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutStatus {
    Enqueued,
    /// The queue was unreachable; the publication is durable, stays flagged
    /// pending, and is re-enqueued by the pending sweeper.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub id: PublicationId,
    pub published_at: OffsetDateTime,
    pub fanout: FanoutStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub scanned: usize,
    pub enqueued: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct PublicationService {
    users: Arc<dyn UsersRepo>,
    publications: Arc<dyn PublicationsRepo>,
    queue: Arc<dyn FanoutQueue>,
}

impl PublicationService {
    pub fn new(
        users: Arc<dyn UsersRepo>,
        publications: Arc<dyn PublicationsRepo>,
        queue: Arc<dyn FanoutQueue>,
    ) -> Self {
        Self {
            users,
            publications,
            queue,
        }
    }

    #[instrument(skip(self, text), fields(author_id = %author_id))]
    pub async fn publish(
        &self,
        author_id: UserId,
        text: &str,
    ) -> Result<PublishReceipt, PublishError> {
        let text = PublicationText::parse(text)?;

        if self.users.find_user(author_id).await?.is_none() {
            return Err(PublishError::UnknownAuthor(author_id));
        }

        let record = self
            .publications
            .create_publication(CreatePublicationParams {
                author_id,
                text,
                published_at: truncate_to_micros(OffsetDateTime::now_utc()),
            })
            .await
            .map_err(|err| match err {
                RepoError::MissingReference { .. } => PublishError::UnknownAuthor(author_id),
                other => PublishError::Repo(other),
            })?;

        let fanout = match self.queue.enqueue(FanoutEvent::from(&record)).await {
            Ok(()) => FanoutStatus::Enqueued,
            Err(err) => {
                counter!(METRIC_PUBLISH_DEFERRED).increment(1);
                warn!(
                    target = "application::publish::publish",
                    publication_id = %record.id,
                    error = %err,
                    "fan-out enqueue failed; publication stored without fan-out"
                );
                FanoutStatus::Deferred
            }
        };

        info!(
            target = "application::publish::publish",
            publication_id = %record.id,
            fanout = ?fanout,
            "publication stored"
        );

        Ok(PublishReceipt {
            id: record.id,
            published_at: record.published_at,
            fanout,
        })
    }

    /// Re-enqueue fan-out events for publications at or after `since`.
    ///
    /// Stops at `limit` publications.
    pub async fn redeliver_since(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<ReplayReport, PublishError> {
        let records = self
            .publications
            .list_publications_since(since, limit)
            .await?;

        Ok(self.enqueue_all(&records, "redeliver_since").await)
    }

    /// Re-enqueue publications whose fan-out has not been applied and that
    /// were published before `older_than`.
    pub async fn redeliver_pending(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> Result<ReplayReport, PublishError> {
        let records = self
            .publications
            .list_pending_fanout(older_than, limit)
            .await?;
        if records.is_empty() {
            return Ok(ReplayReport::default());
        }
        Ok(self.enqueue_all(&records, "redeliver_pending").await)
    }

    // Enqueue failures are counted rather than aborting the scan.
    async fn enqueue_all(&self, records: &[PublicationRecord], op: &'static str) -> ReplayReport {
        let mut report = ReplayReport {
            scanned: records.len(),
            ..ReplayReport::default()
        };
        for record in records {
            match self.queue.enqueue(FanoutEvent::from(record)).await {
                Ok(()) => report.enqueued += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        target = "application::publish::redeliver",
                        op,
                        publication_id = %record.id,
                        error = %err,
                        "fan-out replay enqueue failed"
                    );
                }
            }
        }

        info!(
            target = "application::publish::redeliver",
            op,
            scanned = report.scanned,
            enqueued = report.enqueued,
            failed = report.failed,
            "fan-out replay finished"
        );
        report
    }
}
