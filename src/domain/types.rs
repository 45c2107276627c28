//! Identifier newtypes and the ordering key shared by caches, cursors, and queries.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub i64);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PublicationId(pub i64);

impl UserId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl PublicationId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Position of a publication on a timeline.
///
/// Keys compare by `published_at`, then by id. Feeds are emitted in
/// descending key order, so "newer" means "greater".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimelineKey {
    pub published_at: OffsetDateTime,
    pub id: PublicationId,
}

impl TimelineKey {
    pub fn new(published_at: OffsetDateTime, id: PublicationId) -> Self {
        Self { published_at, id }
    }

    /// True when `self` comes strictly after `cursor` in feed order.
    pub fn follows(&self, cursor: &TimelineKey) -> bool {
        self < cursor
    }
}

impl Ord for TimelineKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.published_at
            .cmp(&other.published_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for TimelineKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Truncate a timestamp to microseconds, the precision PostgreSQL keeps.
pub fn truncate_to_micros(instant: OffsetDateTime) -> OffsetDateTime {
    let micros = instant.nanosecond() / 1_000 * 1_000;
    instant.replace_nanosecond(micros).unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn later_publish_time_sorts_greater() {
        let older = TimelineKey::new(datetime!(2024-01-01 00:00:00 UTC), PublicationId(9));
        let newer = TimelineKey::new(datetime!(2024-01-01 00:00:01 UTC), PublicationId(1));
        assert!(newer > older);
        assert!(older.follows(&newer));
    }

    #[test]
    fn ties_break_on_publication_id() {
        let at = datetime!(2024-01-01 00:00:00 UTC);
        let low = TimelineKey::new(at, PublicationId(3));
        let high = TimelineKey::new(at, PublicationId(4));
        assert!(high > low);
        assert!(!high.follows(&low));
        assert!(!low.follows(&low));
    }

    #[test]
    fn truncation_drops_sub_microsecond_digits() {
        let instant = datetime!(2024-01-01 00:00:00.123456789 UTC);
        let truncated = truncate_to_micros(instant);
        assert_eq!(truncated.nanosecond(), 123_456_000);
    }
}
