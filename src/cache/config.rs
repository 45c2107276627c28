//! Cache configuration.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_RECENT_POSTS_LIMIT: usize = 50;
const DEFAULT_MAX_KEYS: usize = 100_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries kept per author in the recent-posts cache.
    pub recent_posts_limit: usize,
    /// Maximum cached keys (following sets plus recent-posts lists).
    pub max_keys: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            recent_posts_limit: DEFAULT_RECENT_POSTS_LIMIT,
            max_keys: DEFAULT_MAX_KEYS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            recent_posts_limit: settings.recent_posts_limit.get(),
            max_keys: settings.max_keys.get(),
        }
    }
}

impl CacheConfig {
    /// Returns the per-author bound, clamping to 1 if zero.
    pub fn recent_posts_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.recent_posts_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the key bound, clamping to 1 if zero.
    pub fn max_keys_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_keys).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.recent_posts_limit, 50);
        assert_eq!(config.max_keys, 100_000);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            recent_posts_limit: 0,
            max_keys: 0,
        };
        assert_eq!(config.recent_posts_limit_non_zero().get(), 1);
        assert_eq!(config.max_keys_non_zero().get(), 1);
    }
}
