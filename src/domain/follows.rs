use crate::domain::{error::DomainError, types::UserId};

/// A directed edge: `follower_id` receives `author_id`'s publications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FollowEdge {
    author_id: UserId,
    follower_id: UserId,
}

impl FollowEdge {
    pub fn new(author_id: UserId, follower_id: UserId) -> Result<Self, DomainError> {
        if author_id == follower_id {
            return Err(DomainError::invariant(format!(
                "user {author_id} cannot follow themselves"
            )));
        }
        Ok(Self {
            author_id,
            follower_id,
        })
    }

    pub fn author_id(&self) -> UserId {
        self.author_id
    }

    pub fn follower_id(&self) -> UserId {
        self.follower_id
    }
}
