//! Cache key definitions.

use std::fmt;

use crate::domain::types::UserId;

/// Addresses one entry in the cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Authors followed by this user.
    FollowingSet(UserId),
    /// This author's newest publications.
    RecentPosts(UserId),
}

impl CacheKey {
    pub fn kind(&self) -> &'static str {
        match self {
            CacheKey::FollowingSet(_) => "following",
            CacheKey::RecentPosts(_) => "recent",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::FollowingSet(user) | CacheKey::RecentPosts(user) => {
                write!(f, "{}:{user}", self.kind())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_for_same_user_are_distinct() {
        let following = CacheKey::FollowingSet(UserId(7));
        let recent = CacheKey::RecentPosts(UserId(7));
        assert_ne!(following, recent);
        assert_eq!(following.to_string(), "following:7");
        assert_eq!(recent.to_string(), "recent:7");
    }
}
