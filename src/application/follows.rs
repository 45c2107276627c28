//! Follow graph commands and the read-through following set.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::application::repos::{FOLLOW_AUTHOR_FK, FollowsRepo, RepoError};
use crate::cache::{CacheError, FollowingSetCache};
use crate::domain::follows::FollowEdge;
use crate::domain::types::UserId;

#[derive(Debug, Error)]
pub enum FollowError {
    #[error("user {0} cannot follow themselves")]
    InvalidEdge(UserId),
    #[error("user {0} does not exist")]
    UnknownUser(UserId),
    #[error(transparent)]
    Repo(RepoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowOutcome {
    /// `false` when the edge already existed.
    pub created: bool,
}

#[derive(Clone)]
pub struct FollowService {
    follows: Arc<dyn FollowsRepo>,
    cache: FollowingSetCache,
}

impl FollowService {
    pub fn new(follows: Arc<dyn FollowsRepo>, cache: FollowingSetCache) -> Self {
        Self { follows, cache }
    }

    #[instrument(skip(self), fields(author_id = %author_id, follower_id = %follower_id))]
    pub async fn follow(
        &self,
        author_id: UserId,
        follower_id: UserId,
    ) -> Result<FollowOutcome, FollowError> {
        let edge = edge(author_id, follower_id)?;

        let created = self
            .follows
            .create_follow_edge(edge)
            .await
            .map_err(|err| map_edge_error(err, edge))?;

        if let Err(err) = self.cache.add(follower_id, author_id).await {
            self.repair(follower_id, "follow", &err).await;
        }

        debug!(created, "follow edge stored");
        Ok(FollowOutcome { created })
    }

    #[instrument(skip(self), fields(author_id = %author_id, follower_id = %follower_id))]
    pub async fn unfollow(&self, author_id: UserId, follower_id: UserId) -> Result<bool, FollowError> {
        let edge = edge(author_id, follower_id)?;

        let removed = self
            .follows
            .delete_follow_edge(edge)
            .await
            .map_err(FollowError::Repo)?;

        if let Err(err) = self.cache.remove(follower_id, author_id).await {
            self.repair(follower_id, "unfollow", &err).await;
        }

        debug!(removed, "follow edge deleted");
        Ok(removed)
    }

    /// Authors `follower_id` follows, from cache when present.
    pub async fn following_set(&self, follower_id: UserId) -> Result<Vec<UserId>, FollowError> {
        match self.cache.get(follower_id).await {
            Ok(Some(authors)) => return Ok(authors),
            Ok(None) => {}
            Err(err) => warn!(
                target = "application::follows::following_set",
                follower_id = %follower_id,
                error = %err,
                "following-set cache unavailable; reading follow graph"
            ),
        }

        // Taken before the durable read so an edge written meanwhile voids the fill.
        let generation = match self.cache.generation(follower_id).await {
            Ok(generation) => Some(generation),
            Err(err) => {
                warn!(
                    target = "application::follows::following_set",
                    follower_id = %follower_id,
                    error = %err,
                    "following-set generation unavailable; skipping cache fill"
                );
                None
            }
        };

        let authors = self
            .follows
            .query_following_set(follower_id)
            .await
            .map_err(FollowError::Repo)?;

        if let Some(generation) = generation {
            match self
                .cache
                .populate(follower_id, authors.clone(), generation)
                .await
            {
                Ok(true) => {}
                Ok(false) => debug!(
                    target = "application::follows::following_set",
                    follower_id = %follower_id,
                    "follow graph changed during read; cache fill discarded"
                ),
                Err(err) => warn!(
                    target = "application::follows::following_set",
                    follower_id = %follower_id,
                    error = %err,
                    "failed to populate following-set cache"
                ),
            }
        }

        Ok(authors)
    }

    async fn repair(&self, follower_id: UserId, op: &'static str, err: &CacheError) {
        warn!(
            target = "application::follows::repair",
            follower_id = %follower_id,
            op,
            error = %err,
            "following-set cache update failed after durable write; invalidating"
        );
        if let Err(err) = self.cache.invalidate(follower_id).await {
            warn!(
                target = "application::follows::repair",
                follower_id = %follower_id,
                op,
                error = %err,
                "following-set cache invalidation failed; entry may be stale"
            );
        }
    }
}

fn edge(author_id: UserId, follower_id: UserId) -> Result<FollowEdge, FollowError> {
    FollowEdge::new(author_id, follower_id).map_err(|_| FollowError::InvalidEdge(follower_id))
}

fn map_edge_error(err: RepoError, edge: FollowEdge) -> FollowError {
    match err {
        RepoError::MissingReference { constraint } if constraint == FOLLOW_AUTHOR_FK => {
            FollowError::UnknownUser(edge.author_id())
        }
        RepoError::MissingReference { .. } => FollowError::UnknownUser(edge.follower_id()),
        other => FollowError::Repo(other),
    }
}
