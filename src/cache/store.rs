//! Key-addressable cache store.
//!
//! `CacheStore` is the contract the services program against: sets of user
//! ids and descending lists of timeline keys, with per-key atomic operations.
//! `InMemoryCacheStore` keeps everything in one LRU-bounded map.
//!
//! Two guards keep cached entries from drifting away from the durable store:
//!
//! - **Generations**: every set mutation bumps the key's generation, so a
//!   read-through fill computed from an older durable read is discarded.
//! - **Coverage**: a list records how far back it is known to be gap-free.
//!   Lists are only created from a durable read (`list_seed`), and inserts
//!   older than the coverage floor are refused.

use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;

use crate::domain::types::{TimelineKey, UserId};

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";
const GENERATION_STRIPES: usize = 1024;
pub(crate) const METRIC_CACHE_KEY_EVICT: &str = "murmur_cache_key_evict_total";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache entry `{key}` holds a {found}, expected a {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Result of a sorted list insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListInsert {
    Inserted { len: usize },
    Duplicate { len: usize },
    /// Older than the list's coverage floor; left out.
    OutsideWindow { len: usize },
    /// No list is cached under the key; nothing was created.
    Missing,
}

impl ListInsert {
    pub fn len(&self) -> usize {
        match self {
            ListInsert::Inserted { len }
            | ListInsert::Duplicate { len }
            | ListInsert::OutsideWindow { len } => *len,
            ListInsert::Missing => 0,
        }
    }
}

/// Slice of a cached list returned by `list_range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRange {
    pub entries: Vec<TimelineKey>,
    /// The list holds the author's whole history, so a short range is final.
    pub complete: bool,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Members of the set, or `None` when the key is not cached.
    async fn set_members(&self, key: CacheKey) -> Result<Option<Vec<UserId>>, CacheError>;

    /// Current generation of `key`. Read it before the durable read that
    /// feeds `set_replace_if`.
    async fn generation(&self, key: CacheKey) -> Result<u64, CacheError>;

    /// Overwrite the set with a complete membership list, unless the key has
    /// been mutated since `generation` was read. Returns whether it was stored.
    async fn set_replace_if(
        &self,
        key: CacheKey,
        members: Vec<UserId>,
        generation: u64,
    ) -> Result<bool, CacheError>;

    /// Add to an existing set and bump the generation. Returns `false`
    /// without creating anything when the key is not cached.
    async fn set_add(&self, key: CacheKey, member: UserId) -> Result<bool, CacheError>;

    /// Remove from the set if it is cached and bump the generation. Returns
    /// whether a member was removed.
    async fn set_remove(&self, key: CacheKey, member: UserId) -> Result<bool, CacheError>;

    /// Drop the entry and bump the generation.
    async fn invalidate(&self, key: CacheKey) -> Result<(), CacheError>;

    /// Insert into an existing descending list at its sorted position. An
    /// entry whose id is already present is left alone.
    async fn list_insert_sorted(
        &self,
        key: CacheKey,
        entry: TimelineKey,
    ) -> Result<ListInsert, CacheError>;

    /// Merge a durable read of the newest entries into the list, creating it
    /// when absent. `complete` means the read returned everything there is.
    /// Returns the resulting length.
    async fn list_seed(
        &self,
        key: CacheKey,
        entries: Vec<TimelineKey>,
        complete: bool,
    ) -> Result<usize, CacheError>;

    /// Up to `limit` entries strictly after `after` in descending order, or
    /// `None` when the key is not cached.
    async fn list_range(
        &self,
        key: CacheKey,
        after: Option<TimelineKey>,
        limit: usize,
    ) -> Result<Option<ListRange>, CacheError>;

    /// Trim the list to its `keep` newest entries, returning what was removed.
    async fn list_evict_oldest(
        &self,
        key: CacheKey,
        keep: usize,
    ) -> Result<Vec<TimelineKey>, CacheError>;
}

/// How far back a list is known to hold every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    Full,
    From(TimelineKey),
}

impl Coverage {
    fn admits(&self, entry: &TimelineKey) -> bool {
        match self {
            Coverage::Full => true,
            Coverage::From(floor) => entry >= floor,
        }
    }

    fn widen(self, other: Coverage) -> Coverage {
        match (self, other) {
            (Coverage::Full, _) | (_, Coverage::Full) => Coverage::Full,
            (Coverage::From(a), Coverage::From(b)) => Coverage::From(a.min(b)),
        }
    }
}

#[derive(Debug, Clone)]
struct TimelineList {
    entries: Vec<TimelineKey>,
    coverage: Coverage,
}

impl TimelineList {
    fn seeded(mut entries: Vec<TimelineKey>, coverage: Coverage) -> Self {
        entries.sort_unstable_by(|a, b| b.cmp(a));
        entries.dedup_by_key(|entry| entry.id);
        Self { entries, coverage }
    }

    fn merge(&mut self, incoming: Vec<TimelineKey>, coverage: Coverage) {
        // A read that ends below the current floor may straddle entries the
        // list already trimmed; it cannot extend the gap-free range.
        let overlaps = match self.coverage {
            Coverage::Full => true,
            Coverage::From(floor) => incoming.iter().any(|entry| *entry >= floor),
        };
        if !overlaps {
            return;
        }
        for entry in incoming {
            if !self.entries.iter().any(|current| current.id == entry.id) {
                self.entries.push(entry);
            }
        }
        self.entries.sort_unstable_by(|a, b| b.cmp(a));
        self.coverage = self.coverage.widen(coverage);
    }
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Set(BTreeSet<UserId>),
    List(TimelineList),
}

impl CacheEntry {
    fn kind(&self) -> &'static str {
        match self {
            CacheEntry::Set(_) => "set",
            CacheEntry::List(_) => "list",
        }
    }
}

fn wrong_type(key: CacheKey, expected: &'static str, entry: &CacheEntry) -> CacheError {
    CacheError::WrongType {
        key: key.to_string(),
        expected,
        found: entry.kind(),
    }
}

/// In-process cache store bounded by key count.
///
/// Generations live in a fixed array of stripes, so two keys may share one.
/// That only makes a conditional fill fail more often, never succeed wrongly.
pub struct InMemoryCacheStore {
    entries: RwLock<LruCache<CacheKey, CacheEntry>>,
    generations: Box<[AtomicU64]>,
}

impl InMemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.max_keys_non_zero())),
            generations: (0..GENERATION_STRIPES).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stripe(&self, key: CacheKey) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.generations.len() as u64) as usize;
        &self.generations[index]
    }

    // Callers hold the entries write lock, which orders bumps against
    // `set_replace_if`.
    fn bump(&self, key: CacheKey) {
        self.stripe(key).fetch_add(1, Ordering::SeqCst);
    }
}

fn push_entry(entries: &mut LruCache<CacheKey, CacheEntry>, key: CacheKey, entry: CacheEntry) {
    if let Some((evicted, _)) = entries.push(key, entry)
        && evicted != key
    {
        counter!(METRIC_CACHE_KEY_EVICT, "kind" => evicted.kind()).increment(1);
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn set_members(&self, key: CacheKey) -> Result<Option<Vec<UserId>>, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "set_members");
        match entries.get(&key) {
            None => Ok(None),
            Some(CacheEntry::Set(members)) => Ok(Some(members.iter().copied().collect())),
            Some(other) => Err(wrong_type(key, "set", other)),
        }
    }

    async fn generation(&self, key: CacheKey) -> Result<u64, CacheError> {
        Ok(self.stripe(key).load(Ordering::SeqCst))
    }

    async fn set_replace_if(
        &self,
        key: CacheKey,
        members: Vec<UserId>,
        generation: u64,
    ) -> Result<bool, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "set_replace_if");
        if self.stripe(key).load(Ordering::SeqCst) != generation {
            return Ok(false);
        }
        push_entry(
            &mut entries,
            key,
            CacheEntry::Set(members.into_iter().collect()),
        );
        Ok(true)
    }

    async fn set_add(&self, key: CacheKey, member: UserId) -> Result<bool, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "set_add");
        self.bump(key);
        match entries.get_mut(&key) {
            None => Ok(false),
            Some(CacheEntry::Set(members)) => {
                members.insert(member);
                Ok(true)
            }
            Some(other) => Err(wrong_type(key, "set", other)),
        }
    }

    async fn set_remove(&self, key: CacheKey, member: UserId) -> Result<bool, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "set_remove");
        self.bump(key);
        match entries.get_mut(&key) {
            None => Ok(false),
            Some(CacheEntry::Set(members)) => Ok(members.remove(&member)),
            Some(other) => Err(wrong_type(key, "set", other)),
        }
    }

    async fn invalidate(&self, key: CacheKey) -> Result<(), CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate");
        self.bump(key);
        entries.pop(&key);
        Ok(())
    }

    async fn list_insert_sorted(
        &self,
        key: CacheKey,
        entry: TimelineKey,
    ) -> Result<ListInsert, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "list_insert_sorted");
        let list = match entries.get_mut(&key) {
            Some(CacheEntry::List(list)) => list,
            Some(other) => return Err(wrong_type(key, "list", other)),
            None => return Ok(ListInsert::Missing),
        };

        if list.entries.iter().any(|current| current.id == entry.id) {
            return Ok(ListInsert::Duplicate {
                len: list.entries.len(),
            });
        }
        if !list.coverage.admits(&entry) {
            return Ok(ListInsert::OutsideWindow {
                len: list.entries.len(),
            });
        }
        // Descending order: anything greater than `entry` sits to its left.
        let position = list
            .entries
            .binary_search_by(|current| entry.cmp(current))
            .unwrap_or_else(|position| position);
        list.entries.insert(position, entry);
        Ok(ListInsert::Inserted {
            len: list.entries.len(),
        })
    }

    async fn list_seed(
        &self,
        key: CacheKey,
        seed: Vec<TimelineKey>,
        complete: bool,
    ) -> Result<usize, CacheError> {
        let coverage = if complete {
            Coverage::Full
        } else {
            match seed.iter().min() {
                Some(oldest) => Coverage::From(*oldest),
                // An empty partial read proves nothing.
                None => return Ok(0),
            }
        };

        let mut entries = rw_write(&self.entries, SOURCE, "list_seed");
        match entries.get_mut(&key) {
            Some(CacheEntry::List(list)) => {
                list.merge(seed, coverage);
                Ok(list.entries.len())
            }
            Some(other) => Err(wrong_type(key, "list", other)),
            None => {
                let list = TimelineList::seeded(seed, coverage);
                let len = list.entries.len();
                push_entry(&mut entries, key, CacheEntry::List(list));
                Ok(len)
            }
        }
    }

    async fn list_range(
        &self,
        key: CacheKey,
        after: Option<TimelineKey>,
        limit: usize,
    ) -> Result<Option<ListRange>, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "list_range");
        match entries.get(&key) {
            None => Ok(None),
            Some(CacheEntry::List(list)) => Ok(Some(ListRange {
                entries: list
                    .entries
                    .iter()
                    .filter(|candidate| after.is_none_or(|cursor| candidate.follows(&cursor)))
                    .take(limit)
                    .copied()
                    .collect(),
                complete: list.coverage == Coverage::Full,
            })),
            Some(other) => Err(wrong_type(key, "list", other)),
        }
    }

    async fn list_evict_oldest(
        &self,
        key: CacheKey,
        keep: usize,
    ) -> Result<Vec<TimelineKey>, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "list_evict_oldest");
        match entries.get_mut(&key) {
            None => Ok(Vec::new()),
            Some(CacheEntry::List(list)) if list.entries.len() > keep => {
                let removed = list.entries.split_off(keep);
                list.coverage = match list.entries.last() {
                    Some(oldest) => Coverage::From(*oldest),
                    None => match removed.first() {
                        // keep == 0: nothing left to vouch for.
                        Some(newest) => Coverage::From(*newest),
                        None => list.coverage,
                    },
                };
                Ok(removed)
            }
            Some(CacheEntry::List(_)) => Ok(Vec::new()),
            Some(other) => Err(wrong_type(key, "list", other)),
        }
    }
}
