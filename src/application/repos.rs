//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::pagination::PaginationError;
use crate::domain::entities::{PublicationRecord, UserRecord};
use crate::domain::follows::FollowEdge;
use crate::domain::publications::PublicationText;
use crate::domain::types::{PublicationId, TimelineKey, UserId};
use crate::domain::users::Login;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("record references a missing row via `{constraint}`")]
    MissingReference { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Foreign-key constraint naming the author end of a follow edge.
pub const FOLLOW_AUTHOR_FK: &str = "follow_edges_author_id_fkey";
/// Foreign-key constraint naming the follower end of a follow edge.
pub const FOLLOW_FOLLOWER_FK: &str = "follow_edges_follower_id_fkey";

#[derive(Debug, Clone)]
pub struct CreatePublicationParams {
    pub author_id: UserId,
    pub text: PublicationText,
    pub published_at: OffsetDateTime,
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn create_user(&self, login: &Login) -> Result<UserRecord, RepoError>;

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, RepoError>;
}

#[async_trait]
pub trait FollowsRepo: Send + Sync {
    /// Insert the edge; `false` when it already existed.
    async fn create_follow_edge(&self, edge: FollowEdge) -> Result<bool, RepoError>;

    /// Delete the edge; `false` when there was nothing to delete.
    async fn delete_follow_edge(&self, edge: FollowEdge) -> Result<bool, RepoError>;

    /// Every author `follower_id` follows, ascending by id.
    async fn query_following_set(&self, follower_id: UserId) -> Result<Vec<UserId>, RepoError>;
}

#[async_trait]
pub trait PublicationsRepo: Send + Sync {
    async fn create_publication(
        &self,
        params: CreatePublicationParams,
    ) -> Result<PublicationRecord, RepoError>;

    /// Batch lookup; ids with no row are omitted from the result.
    async fn find_publications(
        &self,
        ids: &[PublicationId],
    ) -> Result<Vec<PublicationRecord>, RepoError>;

    /// An author's newest publications strictly after `before` in feed order,
    /// newest first.
    async fn query_recent_publications(
        &self,
        author_id: UserId,
        before: Option<TimelineKey>,
        limit: u32,
    ) -> Result<Vec<PublicationRecord>, RepoError>;

    /// Publications at or after `since`, oldest first.
    async fn list_publications_since(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PublicationRecord>, RepoError>;

    /// Clear the pending fan-out flag every publication is created with.
    async fn mark_fanout_applied(&self, id: PublicationId) -> Result<(), RepoError>;

    /// Publications still flagged pending and published before
    /// `older_than`, oldest first.
    async fn list_pending_fanout(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PublicationRecord>, RepoError>;
}

#[async_trait]
pub trait HealthRepo: Send + Sync {
    async fn health_check(&self) -> Result<(), RepoError>;
}
