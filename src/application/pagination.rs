//! Feed cursor encoding and page requests.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::types::{PublicationId, TimelineKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct FeedCursorPayload {
    published_at: OffsetDateTime,
    id: i64,
}

/// Cursor for paginating a feed in descending timeline order.
///
/// Points at the last item emitted; the next page holds strictly older keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCursor {
    key: TimelineKey,
}

impl FeedCursor {
    pub fn new(key: TimelineKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> TimelineKey {
        self.key
    }

    pub fn encode(&self) -> String {
        let payload = FeedCursorPayload {
            published_at: self.key.published_at,
            id: self.key.id.get(),
        };
        let serialized =
            serde_json::to_vec(&payload).expect("serializing feed cursor payload should succeed");
        URL_SAFE_NO_PAD.encode(serialized)
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: FeedCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(Self {
            key: TimelineKey::new(payload.published_at, PublicationId(payload.id)),
        })
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<C> {
    pub limit: u32,
    pub cursor: Option<C>,
}

impl<C> PageRequest<C> {
    pub fn new(limit: u32, cursor: Option<C>) -> Self {
        Self { limit, cursor }
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}
