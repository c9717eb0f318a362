use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

mod handlers;
mod state;

pub use state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/presentation/request", post(handlers::create_request))
        .route(
            "/presentation/callback/{request_id}",
            post(handlers::callback),
        )
        .route("/presentation/{request_id}/status", get(handlers::status))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_methods(Any)
                .allow_origin(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::new(state))
}
