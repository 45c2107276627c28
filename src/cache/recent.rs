//! Per-author bounded cache of recent publications.

use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::domain::types::{TimelineKey, UserId};

use super::keys::CacheKey;
use super::store::{CacheError, CacheStore, ListInsert, ListRange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecentInsert {
    Inserted { evicted: Vec<TimelineKey> },
    Duplicate { evicted: Vec<TimelineKey> },
    /// Older than every entry the list vouches for.
    OutsideWindow,
    /// The author has no cached list; the caller must seed one.
    Missing,
}

impl RecentInsert {
    pub fn evicted(&self) -> &[TimelineKey] {
        match self {
            RecentInsert::Inserted { evicted } | RecentInsert::Duplicate { evicted } => evicted,
            RecentInsert::OutsideWindow | RecentInsert::Missing => &[],
        }
    }
}

#[derive(Clone)]
pub struct RecentPostsCache {
    store: Arc<dyn CacheStore>,
    limit: NonZeroUsize,
}

impl RecentPostsCache {
    pub fn new(store: Arc<dyn CacheStore>, limit: NonZeroUsize) -> Self {
        Self { store, limit }
    }

    pub fn limit(&self) -> usize {
        self.limit.get()
    }

    /// Insert `entry` into `author_id`'s list and trim it back to the bound.
    ///
    /// Trimming also runs for duplicates, so a redelivery after a failed trim
    /// converges.
    pub async fn insert(
        &self,
        author_id: UserId,
        entry: TimelineKey,
    ) -> Result<RecentInsert, CacheError> {
        let key = CacheKey::RecentPosts(author_id);
        let inserted = self.store.list_insert_sorted(key, entry).await?;

        let evicted = if inserted.len() > self.limit() {
            self.store.list_evict_oldest(key, self.limit()).await?
        } else {
            Vec::new()
        };

        Ok(match inserted {
            ListInsert::Inserted { .. } => RecentInsert::Inserted { evicted },
            ListInsert::Duplicate { .. } => RecentInsert::Duplicate { evicted },
            ListInsert::OutsideWindow { .. } => RecentInsert::OutsideWindow,
            ListInsert::Missing => RecentInsert::Missing,
        })
    }

    /// Seed `author_id`'s list from a durable read of their newest
    /// publications. `complete` means the read returned their whole history.
    /// Returns how many keys stay cached.
    pub async fn backfill(
        &self,
        author_id: UserId,
        newest: Vec<TimelineKey>,
        complete: bool,
    ) -> Result<usize, CacheError> {
        let key = CacheKey::RecentPosts(author_id);
        let len = self.store.list_seed(key, newest, complete).await?;
        if len > self.limit() {
            self.store.list_evict_oldest(key, self.limit()).await?;
            return Ok(self.limit());
        }
        Ok(len)
    }

    /// Up to `needed` cached keys strictly after `after`, newest first.
    /// `None` means the author has no cached list.
    pub async fn candidates(
        &self,
        author_id: UserId,
        after: Option<TimelineKey>,
        needed: usize,
    ) -> Result<Option<ListRange>, CacheError> {
        self.store
            .list_range(CacheKey::RecentPosts(author_id), after, needed)
            .await
    }
}
