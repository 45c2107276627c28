//! Feed read engine.
//!
//! A feed page is assembled at read time: resolve who the reader follows,
//! gather each author's newest keys (cache first, store when the cache cannot
//! fill the page), merge newest-first, then hydrate what came from the cache.
//!
//! Reads degrade instead of failing: an author that cannot be read is left
//! out, and a hydration failure cuts the page short. Either way the page is
//! marked `partial` and its cursor only covers what was returned.

mod merge;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{StreamExt, stream};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::application::follows::{FollowError, FollowService};
use crate::application::pagination::{FeedCursor, PageRequest, PaginationError};
use crate::application::repos::{PublicationsRepo, RepoError};
use crate::cache::RecentPostsCache;
use crate::domain::entities::PublicationRecord;
use crate::domain::types::{PublicationId, TimelineKey, UserId};

use merge::{FeedEntry, merge_timelines};

pub(crate) const METRIC_FEED_READ_MS: &str = "murmur_feed_read_ms";
pub(crate) const METRIC_FEED_CACHE_FALLBACK: &str = "murmur_feed_cache_fallback_total";
pub(crate) const METRIC_FEED_PARTIAL: &str = "murmur_feed_partial_total";

const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_AUTHOR_FETCH_TIMEOUT: Duration = Duration::from_millis(250);
const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 32;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    InvalidCursor(#[from] PaginationError),
    #[error("could not resolve following set: {0}")]
    Following(#[source] FollowError),
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub author_fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            author_fetch_timeout: DEFAULT_AUTHOR_FETCH_TIMEOUT,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

impl From<&crate::config::FeedSettings> for FeedConfig {
    fn from(settings: &crate::config::FeedSettings) -> Self {
        Self {
            default_page_size: settings.default_page_size.get(),
            max_page_size: settings.max_page_size.get(),
            author_fetch_timeout: Duration::from_millis(settings.author_fetch_timeout_ms.get()),
            max_concurrent_fetches: settings.max_concurrent_fetches.get(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub items: Vec<PublicationRecord>,
    /// Set only when older items remain.
    pub next_cursor: Option<FeedCursor>,
    /// Some followed author could not be read in time, or the page was cut
    /// short because publications could not be loaded.
    pub partial: bool,
}

impl FeedPage {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            partial: false,
        }
    }
}

#[derive(Clone)]
pub struct FeedService {
    follows: FollowService,
    recent: RecentPostsCache,
    publications: Arc<dyn PublicationsRepo>,
    config: FeedConfig,
}

impl FeedService {
    pub fn new(
        follows: FollowService,
        recent: RecentPostsCache,
        publications: Arc<dyn PublicationsRepo>,
        config: FeedConfig,
    ) -> Self {
        Self {
            follows,
            recent,
            publications,
            config,
        }
    }

    /// Clamp a requested page size into `[1, max_page_size]`.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1))
    }

    /// Entry point for callers holding an encoded cursor token.
    pub async fn get_feed_with_token(
        &self,
        user_id: UserId,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<FeedPage, FeedError> {
        let cursor = cursor.map(FeedCursor::decode).transpose()?;
        self.get_feed(user_id, PageRequest::new(self.page_size(limit), cursor))
            .await
    }

    #[instrument(skip(self, page), fields(user_id = %user_id, limit = page.limit))]
    pub async fn get_feed(
        &self,
        user_id: UserId,
        page: PageRequest<FeedCursor>,
    ) -> Result<FeedPage, FeedError> {
        let started = Instant::now();
        let page_size = self.page_size(Some(page.limit)) as usize;
        let after = page.cursor.map(|cursor| cursor.key());

        let authors = self
            .follows
            .following_set(user_id)
            .await
            .map_err(FeedError::Following)?;
        if authors.is_empty() {
            return Ok(FeedPage::empty());
        }

        let needed = page_size + 1;
        let attempted = authors.len();
        let fetched: Vec<Option<Vec<FeedEntry>>> = stream::iter(authors)
            .map(|author_id| self.fetch_author(author_id, after, needed))
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let sources: Vec<Vec<FeedEntry>> = fetched.into_iter().flatten().collect();
        let mut partial = sources.len() < attempted;

        let mut merged = merge_timelines(sources, needed);
        let mut has_more = merged.len() > page_size;
        merged.truncate(page_size);

        let hydrated = self.hydrate(merged).await;
        if hydrated.degraded {
            partial = true;
            has_more = true;
        }
        let items = hydrated.items;
        // A degraded page with nothing to show hands back the incoming cursor.
        let next_cursor = if has_more {
            hydrated.last_key.or(after).map(FeedCursor::new)
        } else {
            None
        };

        if partial {
            counter!(METRIC_FEED_PARTIAL).increment(1);
        }
        histogram!(METRIC_FEED_READ_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            items = items.len(),
            authors = attempted,
            partial,
            has_more,
            "feed page assembled"
        );

        Ok(FeedPage {
            items,
            next_cursor,
            partial,
        })
    }

    /// Load one author's candidates under the per-author budget. `None`
    /// means the author is skipped for this page.
    async fn fetch_author(
        &self,
        author_id: UserId,
        after: Option<TimelineKey>,
        needed: usize,
    ) -> Option<Vec<FeedEntry>> {
        let budget = self.config.author_fetch_timeout;
        match tokio::time::timeout(budget, self.load_author(author_id, after, needed)).await {
            Ok(Ok(entries)) => Some(entries),
            Ok(Err(err)) => {
                warn!(
                    target = "application::feed::fetch_author",
                    author_id = %author_id,
                    error = %err,
                    "author timeline unavailable; skipping"
                );
                None
            }
            Err(_) => {
                warn!(
                    target = "application::feed::fetch_author",
                    author_id = %author_id,
                    timeout_ms = budget.as_millis() as u64,
                    "author timeline timed out; skipping"
                );
                None
            }
        }
    }

    async fn load_author(
        &self,
        author_id: UserId,
        after: Option<TimelineKey>,
        needed: usize,
    ) -> Result<Vec<FeedEntry>, RepoError> {
        let reason = match self.recent.candidates(author_id, after, needed).await {
            // A complete list holds everything the author has published.
            Ok(Some(range)) if range.complete || range.entries.len() >= needed => {
                return Ok(range.entries.into_iter().map(FeedEntry::cached).collect());
            }
            Ok(Some(_)) => "short",
            Ok(None) => "miss",
            Err(err) => {
                debug!(
                    author_id = %author_id,
                    error = %err,
                    "recent-posts cache unavailable"
                );
                "unavailable"
            }
        };
        counter!(METRIC_FEED_CACHE_FALLBACK, "reason" => reason).increment(1);

        let limit = u32::try_from(needed).unwrap_or(u32::MAX);
        let records = self
            .publications
            .query_recent_publications(author_id, after, limit)
            .await?;
        Ok(records.into_iter().map(FeedEntry::stored).collect())
    }

    /// Attach records to cache-only entries. If the batch load fails, the
    /// page keeps its prefix of store-read entries and is marked degraded.
    async fn hydrate(&self, entries: Vec<FeedEntry>) -> Hydrated {
        let missing: Vec<PublicationId> = entries
            .iter()
            .filter(|entry| entry.record.is_none())
            .map(|entry| entry.key.id)
            .collect();

        let mut degraded = false;
        let mut loaded: HashMap<PublicationId, PublicationRecord> = if missing.is_empty() {
            HashMap::new()
        } else {
            match self.publications.find_publications(&missing).await {
                Ok(records) => records
                    .into_iter()
                    .map(|record| (record.id, record))
                    .collect(),
                Err(err) => {
                    warn!(
                        target = "application::feed::hydrate",
                        publications = missing.len(),
                        error = %err,
                        "failed to load cached publications; truncating page"
                    );
                    degraded = true;
                    HashMap::new()
                }
            }
        };

        let mut items = Vec::with_capacity(entries.len());
        let mut last_key = None;
        for entry in entries {
            if degraded && entry.record.is_none() {
                break;
            }
            match entry.record.or_else(|| loaded.remove(&entry.key.id)) {
                Some(record) => items.push(record),
                None => warn!(
                    target = "application::feed::hydrate",
                    publication_id = %entry.key.id,
                    "cached publication missing from store; omitted"
                ),
            }
            last_key = Some(entry.key);
        }
        Hydrated {
            items,
            last_key,
            degraded,
        }
    }
}

struct Hydrated {
    items: Vec<PublicationRecord>,
    /// Key of the last entry consumed, returned or omitted.
    last_key: Option<TimelineKey>,
    degraded: bool,
}
