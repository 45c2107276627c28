#![deny(clippy::all, clippy::pedantic)]

use reqwest::Method;
use serde_json::json;

use murmur_api_types::{
    FeedResponse, FollowRequest, FollowResponse, FollowingResponse, PublicationCreateRequest,
    PublicationResponse, UnfollowResponse, UserCreateRequest, UserResponse,
};

use crate::args::Commands;
use crate::client::{CliError, Ctx};
use crate::io::read_text;
use crate::print::print_json;

const NO_QUERY: &[(&str, String)] = &[];

pub async fn handle(ctx: &Ctx, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::CreateUser { login } => {
            let user: UserResponse = ctx
                .request(Method::POST, "users", NO_QUERY, Some(&UserCreateRequest { login }))
                .await?;
            print_json(&user)
        }
        Commands::Follow { author, follower } => {
            let body = FollowRequest {
                user_id: author,
                follower_id: follower,
            };
            let outcome: FollowResponse = ctx
                .request(Method::POST, "followers", NO_QUERY, Some(&body))
                .await?;
            print_json(&outcome)
        }
        Commands::Unfollow { author, follower } => {
            let body = FollowRequest {
                user_id: author,
                follower_id: follower,
            };
            let outcome: UnfollowResponse = ctx
                .request(Method::DELETE, "followers", NO_QUERY, Some(&body))
                .await?;
            print_json(&outcome)
        }
        Commands::Following { user } => {
            let following: FollowingResponse = ctx
                .request::<_, ()>(Method::GET, &format!("users/{user}/following"), NO_QUERY, None)
                .await?;
            print_json(&following)
        }
        Commands::Publish {
            author,
            text,
            text_file,
        } => {
            let body = PublicationCreateRequest {
                author_id: author,
                text: read_text(text, text_file)?,
            };
            let receipt: PublicationResponse = ctx
                .request(Method::POST, "publications", NO_QUERY, Some(&body))
                .await?;
            print_json(&receipt)
        }
        Commands::Feed {
            user,
            limit,
            cursor,
        } => {
            let query = feed_query(limit, cursor);
            let page: FeedResponse = ctx
                .request::<_, ()>(Method::GET, &format!("feed/{user}"), &query, None)
                .await?;
            print_json(&page)
        }
        Commands::Health => {
            let status = ctx.request_status(Method::GET, "healthz").await?;
            print_json(&json!({ "status": status.as_u16() }))
        }
    }
}

pub fn feed_query(limit: Option<u32>, cursor: Option<String>) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(limit) = limit {
        query.push(("limit", limit.to_string()));
    }
    if let Some(cursor) = cursor {
        query.push(("cursor", cursor));
    }
    query
}
