//! Following-set mirror over the cache store.

use std::sync::Arc;

use crate::domain::types::UserId;

use super::keys::CacheKey;
use super::store::{CacheError, CacheStore};

/// Cached view of which authors each user follows.
///
/// Entries are only created from a complete durable read (`populate`);
/// `add` and `remove` touch an entry only when one is already cached. Both
/// bump the key's generation, which `populate` checks before storing.
#[derive(Clone)]
pub struct FollowingSetCache {
    store: Arc<dyn CacheStore>,
}

impl FollowingSetCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, follower_id: UserId) -> Result<Option<Vec<UserId>>, CacheError> {
        self.store
            .set_members(CacheKey::FollowingSet(follower_id))
            .await
    }

    /// Read before the durable read that feeds `populate`.
    pub async fn generation(&self, follower_id: UserId) -> Result<u64, CacheError> {
        self.store
            .generation(CacheKey::FollowingSet(follower_id))
            .await
    }

    /// Store `authors` unless the follower's edges changed after
    /// `generation` was read. Returns whether the set was stored.
    pub async fn populate(
        &self,
        follower_id: UserId,
        authors: Vec<UserId>,
        generation: u64,
    ) -> Result<bool, CacheError> {
        self.store
            .set_replace_if(CacheKey::FollowingSet(follower_id), authors, generation)
            .await
    }

    pub async fn add(&self, follower_id: UserId, author_id: UserId) -> Result<bool, CacheError> {
        self.store
            .set_add(CacheKey::FollowingSet(follower_id), author_id)
            .await
    }

    pub async fn remove(&self, follower_id: UserId, author_id: UserId) -> Result<bool, CacheError> {
        self.store
            .set_remove(CacheKey::FollowingSet(follower_id), author_id)
            .await
    }

    pub async fn invalidate(&self, follower_id: UserId) -> Result<(), CacheError> {
        self.store
            .invalidate(CacheKey::FollowingSet(follower_id))
            .await
    }
}
