//! Murmur cache layer
//!
//! Two views share one key-addressable store:
//!
//! - **Following sets**: per-user set of followed authors, read-through from
//!   the follow graph.
//! - **Recent posts**: per-author list of the newest publication keys, filled
//!   by the fan-out worker and bounded by `cache.recent_posts_limit`. A list
//!   that is missing is seeded from the publication store on the next
//!   delivery, never started empty.
//!
//! ```toml
//! [cache]
//! recent_posts_limit = 50
//! max_keys = 100000
//! ```

mod config;
mod following;
mod keys;
pub(crate) mod lock;
mod recent;
mod store;

pub use config::CacheConfig;
pub use following::FollowingSetCache;
pub use keys::CacheKey;
pub use recent::{RecentInsert, RecentPostsCache};
pub use store::{CacheError, CacheStore, InMemoryCacheStore, ListInsert, ListRange};
pub(crate) use store::METRIC_CACHE_KEY_EVICT;
