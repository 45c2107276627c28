//! JSON handlers for the murmur API.
//!
//! Extractor rejections are folded into `ApiError` so every failure shares
//! the `{"error": {...}}` body.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use murmur_api_types::{
    FanoutState, FeedItem, FeedQuery, FeedResponse, FollowRequest, FollowResponse,
    FollowingResponse, PublicationCreateRequest, PublicationResponse, UnfollowResponse,
    UserCreateRequest, UserResponse,
};

use crate::application::error::ErrorReport;
use crate::application::publish::FanoutStatus;
use crate::domain::entities::PublicationRecord;
use crate::domain::types::UserId;

use super::error::{ApiError, feed_to_api, follow_to_api, publish_to_api, user_to_api};
use super::state::ApiState;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|err| ApiError::bad_request("Invalid request body", Some(err.body_text())))
}

fn path_id(path: Result<Path<i64>, PathRejection>) -> Result<UserId, ApiError> {
    path.map(|Path(id)| UserId(id))
        .map_err(|err| ApiError::bad_request("Invalid user id", Some(err.body_text())))
}

pub async fn create_user(
    State(state): State<ApiState>,
    payload: Result<Json<UserCreateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(payload)?;
    let user = state
        .users
        .create_user(&request.login)
        .await
        .map_err(user_to_api)?;

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            id: user.id.get(),
            login: user.login,
        }),
    ))
}

pub async fn follow(
    State(state): State<ApiState>,
    payload: Result<Json<FollowRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(payload)?;
    let outcome = state
        .follows
        .follow(UserId(request.user_id), UserId(request.follower_id))
        .await
        .map_err(follow_to_api)?;

    Ok((
        StatusCode::CREATED,
        Json(FollowResponse {
            created: outcome.created,
        }),
    ))
}

pub async fn unfollow(
    State(state): State<ApiState>,
    payload: Result<Json<FollowRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(payload)?;
    let removed = state
        .follows
        .unfollow(UserId(request.user_id), UserId(request.follower_id))
        .await
        .map_err(follow_to_api)?;

    Ok(Json(UnfollowResponse { removed }))
}

pub async fn following(
    State(state): State<ApiState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let follower_id = path_id(path)?;
    let authors = state
        .follows
        .following_set(follower_id)
        .await
        .map_err(follow_to_api)?;

    Ok(Json(FollowingResponse {
        author_ids: authors.into_iter().map(UserId::get).collect(),
    }))
}

pub async fn create_publication(
    State(state): State<ApiState>,
    payload: Result<Json<PublicationCreateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body(payload)?;
    let receipt = state
        .publications
        .publish(UserId(request.author_id), &request.text)
        .await
        .map_err(publish_to_api)?;

    let fanout = match receipt.fanout {
        FanoutStatus::Enqueued => FanoutState::Enqueued,
        FanoutStatus::Deferred => FanoutState::Deferred,
    };
    Ok((
        StatusCode::CREATED,
        Json(PublicationResponse {
            id: receipt.id.get(),
            published_at: receipt.published_at,
            fanout,
        }),
    ))
}

pub async fn get_feed(
    State(state): State<ApiState>,
    path: Result<Path<i64>, PathRejection>,
    query: Result<Query<FeedQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = path_id(path)?;
    let Query(query) = query
        .map_err(|err| ApiError::bad_request("Invalid query", Some(err.body_text())))?;

    let page = state
        .feed
        .get_feed_with_token(user_id, query.limit, query.cursor.as_deref())
        .await
        .map_err(feed_to_api)?;

    Ok(Json(FeedResponse {
        items: page.items.into_iter().map(feed_item).collect(),
        next_cursor: page.next_cursor.map(|cursor| cursor.encode()),
        partial: page.partial,
    }))
}

pub async fn health(State(state): State<ApiState>) -> Response {
    match state.health.health_check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

fn feed_item(record: PublicationRecord) -> FeedItem {
    FeedItem {
        id: record.id.get(),
        author_id: record.author_id.get(),
        text: record.text,
        published_at: record.published_at,
    }
}
