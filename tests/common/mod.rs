//! In-memory stand-ins for the durable store, cache store, and queue, plus a
//! harness that wires them into the real services.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use murmur::application::fanout::{FanoutEvent, FanoutQueue, FanoutWorker, QueueError};
use murmur::application::feed::{FeedConfig, FeedService};
use murmur::application::follows::FollowService;
use murmur::application::publish::PublicationService;
use murmur::application::repos::{
    CreatePublicationParams, FOLLOW_AUTHOR_FK, FOLLOW_FOLLOWER_FK, FollowsRepo, HealthRepo,
    PublicationsRepo, RepoError, UsersRepo,
};
use murmur::application::users::UserService;
use murmur::cache::{
    CacheConfig, CacheError, CacheKey, CacheStore, FollowingSetCache, InMemoryCacheStore,
    ListInsert, ListRange, RecentPostsCache,
};
use murmur::domain::entities::{PublicationRecord, UserRecord};
use murmur::domain::follows::FollowEdge;
use murmur::domain::types::{PublicationId, TimelineKey, UserId};
use murmur::domain::users::Login;
use murmur::infra::http::ApiState;

#[derive(Default)]
struct StoreState {
    users: BTreeMap<UserId, UserRecord>,
    edges: BTreeSet<(UserId, UserId)>,
    publications: BTreeMap<PublicationId, PublicationRecord>,
    pending_fanout: BTreeSet<PublicationId>,
    next_user: i64,
    next_publication: i64,
}

/// Durable store kept in memory, with failure and latency knobs.
#[derive(Default)]
pub struct MemoryRepos {
    state: Mutex<StoreState>,
    failing_authors: std::sync::Mutex<HashSet<UserId>>,
    slow_authors: std::sync::Mutex<HashMap<UserId, Duration>>,
    following_read_delay: std::sync::Mutex<Option<Duration>>,
    failing_hydration: AtomicBool,
    recent_queries: AtomicUsize,
    unhealthy: AtomicBool,
}

impl MemoryRepos {
    /// Store a publication with an explicit timestamp, bypassing the service.
    pub async fn insert_publication(
        &self,
        author_id: UserId,
        text: &str,
        published_at: OffsetDateTime,
    ) -> PublicationRecord {
        let mut state = self.state.lock().await;
        state.next_publication += 1;
        let record = PublicationRecord {
            id: PublicationId(state.next_publication),
            author_id,
            text: text.to_string(),
            published_at,
        };
        state.publications.insert(record.id, record.clone());
        state.pending_fanout.insert(record.id);
        record
    }

    /// Publications whose fan-out has not been applied yet.
    pub async fn pending_fanout(&self) -> Vec<PublicationId> {
        self.state.lock().await.pending_fanout.iter().copied().collect()
    }

    pub async fn delete_publication(&self, id: PublicationId) {
        self.state.lock().await.publications.remove(&id);
    }

    pub async fn publication_count(&self) -> usize {
        self.state.lock().await.publications.len()
    }

    pub fn fail_author(&self, author_id: UserId) {
        self.failing_authors
            .lock()
            .expect("failing authors lock")
            .insert(author_id);
    }

    pub fn slow_author(&self, author_id: UserId, delay: Duration) {
        self.slow_authors
            .lock()
            .expect("slow authors lock")
            .insert(author_id, delay);
    }

    /// Follow-graph reads return what they saw, then wait `delay`.
    pub fn delay_following_reads(&self, delay: Duration) {
        *self
            .following_read_delay
            .lock()
            .expect("following delay lock") = Some(delay);
    }

    pub fn set_hydration_failing(&self, failing: bool) {
        self.failing_hydration.store(failing, Ordering::SeqCst);
    }

    /// Number of per-author timeline reads served by the store.
    pub fn recent_queries(&self) -> usize {
        self.recent_queries.load(Ordering::SeqCst)
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl UsersRepo for MemoryRepos {
    async fn create_user(&self, login: &Login) -> Result<UserRecord, RepoError> {
        let mut state = self.state.lock().await;
        state.next_user += 1;
        let record = UserRecord {
            id: UserId(state.next_user),
            login: login.as_str().to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        state.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, RepoError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }
}

#[async_trait]
impl FollowsRepo for MemoryRepos {
    async fn create_follow_edge(&self, edge: FollowEdge) -> Result<bool, RepoError> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&edge.author_id()) {
            return Err(RepoError::MissingReference {
                constraint: FOLLOW_AUTHOR_FK.to_string(),
            });
        }
        if !state.users.contains_key(&edge.follower_id()) {
            return Err(RepoError::MissingReference {
                constraint: FOLLOW_FOLLOWER_FK.to_string(),
            });
        }
        Ok(state.edges.insert((edge.author_id(), edge.follower_id())))
    }

    async fn delete_follow_edge(&self, edge: FollowEdge) -> Result<bool, RepoError> {
        Ok(self
            .state
            .lock()
            .await
            .edges
            .remove(&(edge.author_id(), edge.follower_id())))
    }

    async fn query_following_set(&self, follower_id: UserId) -> Result<Vec<UserId>, RepoError> {
        let authors: Vec<UserId> = self
            .state
            .lock()
            .await
            .edges
            .iter()
            .filter(|(_, follower)| *follower == follower_id)
            .map(|(author, _)| *author)
            .collect();

        let delay = *self
            .following_read_delay
            .lock()
            .expect("following delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(authors)
    }
}

#[async_trait]
impl PublicationsRepo for MemoryRepos {
    async fn create_publication(
        &self,
        params: CreatePublicationParams,
    ) -> Result<PublicationRecord, RepoError> {
        if !self.state.lock().await.users.contains_key(&params.author_id) {
            return Err(RepoError::MissingReference {
                constraint: "publications_author_id_fkey".to_string(),
            });
        }
        Ok(self
            .insert_publication(params.author_id, params.text.as_str(), params.published_at)
            .await)
    }

    async fn find_publications(
        &self,
        ids: &[PublicationId],
    ) -> Result<Vec<PublicationRecord>, RepoError> {
        if self.failing_hydration.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.publications.get(id).cloned())
            .collect())
    }

    async fn query_recent_publications(
        &self,
        author_id: UserId,
        before: Option<TimelineKey>,
        limit: u32,
    ) -> Result<Vec<PublicationRecord>, RepoError> {
        self.recent_queries.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .slow_authors
            .lock()
            .expect("slow authors lock")
            .get(&author_id)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failing_authors
            .lock()
            .expect("failing authors lock")
            .contains(&author_id);
        if failing {
            return Err(RepoError::Timeout);
        }

        let state = self.state.lock().await;
        let mut records: Vec<PublicationRecord> = state
            .publications
            .values()
            .filter(|record| record.author_id == author_id)
            .filter(|record| before.is_none_or(|cursor| record.timeline_key() < cursor))
            .cloned()
            .collect();
        records.sort_by_key(|record| std::cmp::Reverse(record.timeline_key()));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn list_publications_since(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PublicationRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut records: Vec<PublicationRecord> = state
            .publications
            .values()
            .filter(|record| record.published_at >= since)
            .cloned()
            .collect();
        records.sort_by_key(PublicationRecord::timeline_key);
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn mark_fanout_applied(&self, id: PublicationId) -> Result<(), RepoError> {
        self.state.lock().await.pending_fanout.remove(&id);
        Ok(())
    }

    async fn list_pending_fanout(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PublicationRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut records: Vec<PublicationRecord> = state
            .pending_fanout
            .iter()
            .filter_map(|id| state.publications.get(id))
            .filter(|record| record.published_at < older_than)
            .cloned()
            .collect();
        records.sort_by_key(PublicationRecord::timeline_key);
        records.truncate(limit as usize);
        Ok(records)
    }
}

#[async_trait]
impl HealthRepo for MemoryRepos {
    async fn health_check(&self) -> Result<(), RepoError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(RepoError::Persistence("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Cache store that can be switched into an unavailable state.
pub struct FlakyCacheStore {
    inner: InMemoryCacheStore,
    failing: AtomicBool,
}

impl FlakyCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: InMemoryCacheStore::new(config),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FlakyCacheStore {
    async fn set_members(&self, key: CacheKey) -> Result<Option<Vec<UserId>>, CacheError> {
        self.check()?;
        self.inner.set_members(key).await
    }

    async fn generation(&self, key: CacheKey) -> Result<u64, CacheError> {
        self.check()?;
        self.inner.generation(key).await
    }

    async fn set_replace_if(
        &self,
        key: CacheKey,
        members: Vec<UserId>,
        generation: u64,
    ) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.set_replace_if(key, members, generation).await
    }

    async fn set_add(&self, key: CacheKey, member: UserId) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: CacheKey, member: UserId) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.set_remove(key, member).await
    }

    async fn invalidate(&self, key: CacheKey) -> Result<(), CacheError> {
        self.check()?;
        self.inner.invalidate(key).await
    }

    async fn list_insert_sorted(
        &self,
        key: CacheKey,
        entry: TimelineKey,
    ) -> Result<ListInsert, CacheError> {
        self.check()?;
        self.inner.list_insert_sorted(key, entry).await
    }

    async fn list_seed(
        &self,
        key: CacheKey,
        entries: Vec<TimelineKey>,
        complete: bool,
    ) -> Result<usize, CacheError> {
        self.check()?;
        self.inner.list_seed(key, entries, complete).await
    }

    async fn list_range(
        &self,
        key: CacheKey,
        after: Option<TimelineKey>,
        limit: usize,
    ) -> Result<Option<ListRange>, CacheError> {
        self.check()?;
        self.inner.list_range(key, after, limit).await
    }

    async fn list_evict_oldest(
        &self,
        key: CacheKey,
        keep: usize,
    ) -> Result<Vec<TimelineKey>, CacheError> {
        self.check()?;
        self.inner.list_evict_oldest(key, keep).await
    }
}

/// Queue that records events for the test to deliver by hand.
#[derive(Default)]
pub struct RecordingQueue {
    events: Mutex<Vec<FanoutEvent>>,
    failing: AtomicBool,
}

impl RecordingQueue {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn take(&self) -> Vec<FanoutEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }
}

#[async_trait]
impl FanoutQueue for RecordingQueue {
    async fn enqueue(&self, event: FanoutEvent) -> Result<(), QueueError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("broker offline".to_string()));
        }
        self.events.lock().await.push(event);
        Ok(())
    }
}

pub struct Harness {
    pub repos: Arc<MemoryRepos>,
    pub cache: Arc<FlakyCacheStore>,
    pub queue: Arc<RecordingQueue>,
    pub recent: RecentPostsCache,
    pub worker: FanoutWorker,
    pub users: UserService,
    pub follows: FollowService,
    pub publications: PublicationService,
    pub feed: FeedService,
}

impl Harness {
    pub fn new(recent_posts_limit: usize) -> Self {
        Self::with_feed_config(recent_posts_limit, FeedConfig::default())
    }

    pub fn with_feed_config(recent_posts_limit: usize, feed_config: FeedConfig) -> Self {
        let repos = Arc::new(MemoryRepos::default());
        let cache = Arc::new(FlakyCacheStore::new(&CacheConfig::default()));
        let queue = Arc::new(RecordingQueue::default());

        let recent = RecentPostsCache::new(
            cache.clone(),
            NonZeroUsize::new(recent_posts_limit).expect("non-zero limit"),
        );
        let worker = FanoutWorker::new(recent.clone(), repos.clone());
        let follows = FollowService::new(repos.clone(), FollowingSetCache::new(cache.clone()));
        let users = UserService::new(repos.clone());
        let publications = PublicationService::new(repos.clone(), repos.clone(), queue.clone());
        let feed = FeedService::new(follows.clone(), recent.clone(), repos.clone(), feed_config);

        Self {
            repos,
            cache,
            queue,
            recent,
            worker,
            users,
            follows,
            publications,
            feed,
        }
    }

    pub async fn user(&self, login: &str) -> UserId {
        self.users.create_user(login).await.expect("create user").id
    }

    /// Drop an author's cached list, as key-bound eviction would.
    pub async fn forget_recent(&self, author_id: UserId) {
        self.cache
            .invalidate(CacheKey::RecentPosts(author_id))
            .await
            .expect("invalidate");
    }

    /// Apply every queued fan-out event, in enqueue order.
    pub async fn deliver_all(&self) -> usize {
        let events = self.queue.take().await;
        for event in &events {
            self.worker.handle(event).await.expect("fan-out");
        }
        events.len()
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            users: self.users.clone(),
            follows: self.follows.clone(),
            publications: self.publications.clone(),
            feed: self.feed.clone(),
            health: self.repos.clone(),
        }
    }
}

pub fn texts(items: &[PublicationRecord]) -> Vec<&str> {
    items.iter().map(|record| record.text.as_str()).collect()
}
