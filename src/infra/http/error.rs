use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use murmur_api_types::{ApiErrorBody, ApiErrorPayload};

use crate::application::error::ErrorReport;
use crate::application::feed::FeedError;
use crate::application::follows::FollowError;
use crate::application::publish::PublishError;
use crate::application::repos::RepoError;
use crate::application::users::UserError;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const INVALID_EDGE: &str = "invalid_edge";
    pub const UNKNOWN_USER: &str = "unknown_user";
    pub const UNKNOWN_AUTHOR: &str = "unknown_author";
    pub const INVALID_PUBLICATION: &str = "invalid_publication";
    pub const INVALID_CURSOR: &str = "invalid_cursor";
    pub const DUPLICATE: &str = "duplicate";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const REPO: &str = "repo_error";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = format!(
            "{}: {}",
            self.code,
            self.hint.as_deref().unwrap_or(self.message)
        );
        let body = ApiErrorBody {
            error: ApiErrorPayload {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message("infra::http", self.status, detail).attach(&mut response);
        response
    }
}

pub(crate) fn repo_to_api(err: RepoError) -> ApiError {
    match err {
        RepoError::Duplicate { constraint } => ApiError::new(
            StatusCode::CONFLICT,
            codes::DUPLICATE,
            "Duplicate record",
            Some(constraint),
        ),
        RepoError::Pagination(err) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_CURSOR,
            "Invalid cursor",
            Some(err.to_string()),
        ),
        RepoError::InvalidInput { message } => ApiError::bad_request("Invalid input", Some(message)),
        RepoError::Timeout => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::DB_TIMEOUT,
            "Database timeout",
            None,
        ),
        other @ (RepoError::NotFound
        | RepoError::MissingReference { .. }
        | RepoError::Integrity { .. }
        | RepoError::Persistence(_)) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Persistence error",
            Some(other.to_string()),
        ),
    }
}

pub(crate) fn user_to_api(err: UserError) -> ApiError {
    match err {
        UserError::Invalid(err) => ApiError::bad_request("Invalid user", Some(err.to_string())),
        UserError::Repo(err) => repo_to_api(err),
    }
}

pub(crate) fn follow_to_api(err: FollowError) -> ApiError {
    match err {
        FollowError::InvalidEdge(user_id) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_EDGE,
            "A user cannot follow themselves",
            Some(format!("user {user_id}")),
        ),
        FollowError::UnknownUser(user_id) => ApiError::new(
            StatusCode::NOT_FOUND,
            codes::UNKNOWN_USER,
            "User not found",
            Some(format!("user {user_id}")),
        ),
        FollowError::Repo(err) => repo_to_api(err),
    }
}

pub(crate) fn publish_to_api(err: PublishError) -> ApiError {
    match err {
        PublishError::InvalidPublication(err) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_PUBLICATION,
            "Invalid publication",
            Some(err.to_string()),
        ),
        PublishError::UnknownAuthor(author_id) => ApiError::new(
            StatusCode::NOT_FOUND,
            codes::UNKNOWN_AUTHOR,
            "Author not found",
            Some(format!("user {author_id}")),
        ),
        PublishError::Repo(err) => repo_to_api(err),
    }
}

pub(crate) fn feed_to_api(err: FeedError) -> ApiError {
    match err {
        FeedError::InvalidCursor(err) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_CURSOR,
            "Invalid cursor",
            Some(err.to_string()),
        ),
        FeedError::Following(err) => follow_to_api(err),
    }
}
