use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;

use crate::application::repos::{CreatePublicationParams, PublicationsRepo, RepoError};
use crate::domain::entities::PublicationRecord;
use crate::domain::types::{PublicationId, TimelineKey, UserId};

use super::{PostgresRepositories, map_sqlx_error};

const PUBLICATION_COLUMNS: &str = "id, author_id, body, published_at";

#[derive(sqlx::FromRow)]
struct PublicationRow {
    id: PublicationId,
    author_id: UserId,
    body: String,
    published_at: OffsetDateTime,
}

impl From<PublicationRow> for PublicationRecord {
    fn from(row: PublicationRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            text: row.body,
            published_at: row.published_at,
        }
    }
}

#[async_trait]
impl PublicationsRepo for PostgresRepositories {
    async fn create_publication(
        &self,
        params: CreatePublicationParams,
    ) -> Result<PublicationRecord, RepoError> {
        let row = sqlx::query_as::<_, PublicationRow>(&format!(
            "INSERT INTO publications (author_id, body, published_at) \
             VALUES ($1, $2, $3) \
             RETURNING {PUBLICATION_COLUMNS}"
        ))
        .bind(params.author_id)
        .bind(params.text.into_inner())
        .bind(params.published_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn find_publications(
        &self,
        ids: &[PublicationId],
    ) -> Result<Vec<PublicationRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();

        let rows = sqlx::query_as::<_, PublicationRow>(&format!(
            "SELECT {PUBLICATION_COLUMNS} FROM publications WHERE id = ANY($1)"
        ))
        .bind(raw_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PublicationRecord::from).collect())
    }

    async fn query_recent_publications(
        &self,
        author_id: UserId,
        before: Option<TimelineKey>,
        limit: u32,
    ) -> Result<Vec<PublicationRecord>, RepoError> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(PUBLICATION_COLUMNS);
        qb.push(" FROM publications WHERE author_id = ");
        qb.push_bind(author_id);

        if let Some(before) = before {
            qb.push(" AND (published_at, id) < (");
            qb.push_bind(before.published_at);
            qb.push(", ");
            qb.push_bind(before.id);
            qb.push(")");
        }

        qb.push(" ORDER BY published_at DESC, id DESC LIMIT ");
        qb.push_bind(i64::from(limit));

        let rows = qb
            .build_query_as::<PublicationRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PublicationRecord::from).collect())
    }

    async fn list_publications_since(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PublicationRecord>, RepoError> {
        let rows = sqlx::query_as::<_, PublicationRow>(&format!(
            "SELECT {PUBLICATION_COLUMNS} FROM publications \
             WHERE published_at >= $1 \
             ORDER BY published_at, id \
             LIMIT $2"
        ))
        .bind(since)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PublicationRecord::from).collect())
    }

    async fn mark_fanout_applied(&self, id: PublicationId) -> Result<(), RepoError> {
        sqlx::query("UPDATE publications SET fanout_pending = FALSE WHERE id = $1 AND fanout_pending")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_pending_fanout(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PublicationRecord>, RepoError> {
        let rows = sqlx::query_as::<_, PublicationRow>(&format!(
            "SELECT {PUBLICATION_COLUMNS} FROM publications \
             WHERE fanout_pending AND published_at < $1 \
             ORDER BY published_at, id \
             LIMIT $2"
        ))
        .bind(older_than)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PublicationRecord::from).collect())
    }
}
