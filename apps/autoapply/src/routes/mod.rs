pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::applications::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/applications",
            post(handlers::handle_create_application),
        )
        .route(
            "/api/v1/applications/:id",
            get(handlers::handle_get_application),
        )
        .route(
            "/api/v1/applications/:id/pending",
            get(handlers::handle_get_pending),
        )
        .route(
            "/api/v1/applications/:id/answers",
            post(handlers::handle_submit_answers),
        )
        .route(
            "/api/v1/applications/:id/cancel",
            post(handlers::handle_cancel_application),
        )
        .with_state(state)
}
