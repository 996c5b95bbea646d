mod handlers;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::scheduler::StatusMap;

pub fn create_router(status: StatusMap) -> Router {
    let api = Router::new()
        // Projects
        .route("/status", get(handlers::list_status))
        .route("/projects/{name}", get(handlers::project_status))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(status)
}
