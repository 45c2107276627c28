//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::types::{PublicationId, TimelineKey, UserId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: UserId,
    pub login: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicationRecord {
    pub id: PublicationId,
    pub author_id: UserId,
    pub text: String,
    pub published_at: OffsetDateTime,
}

impl PublicationRecord {
    pub fn timeline_key(&self) -> TimelineKey {
        TimelineKey::new(self.published_at, self.id)
    }
}
