mod error;
mod handlers;
mod middleware;
mod state;

pub use error::{ApiError, codes};
pub use middleware::RequestContext;
pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use middleware::{log_responses, set_request_context};

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/users", post(handlers::create_user))
        .route("/users/{id}/following", get(handlers::following))
        .route(
            "/followers",
            post(handlers::follow).delete(handlers::unfollow),
        )
        .route("/publications", post(handlers::create_publication))
        .route("/feed/{user_id}", get(handlers::get_feed))
        .route("/healthz", get(handlers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
