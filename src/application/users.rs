use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::application::repos::{RepoError, UsersRepo};
use crate::domain::entities::UserRecord;
use crate::domain::error::DomainError;
use crate::domain::users::Login;

#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UsersRepo>,
}

impl UserService {
    pub fn new(users: Arc<dyn UsersRepo>) -> Self {
        Self { users }
    }

    pub async fn create_user(&self, login: &str) -> Result<UserRecord, UserError> {
        let login = Login::parse(login)?;
        let user = self.users.create_user(&login).await?;
        info!(
            target = "application::users::create_user",
            user_id = %user.id,
            "user created"
        );
        Ok(user)
    }
}
