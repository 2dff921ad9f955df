use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::health::ReadinessSnapshot;
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/voice/ws", get(crate::api::voice::ws_upgrade))
        .route("/health", get(health_handler));

    Router::new()
        .nest("/v1", v1_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<ReadinessSnapshot> {
    Json(state.readiness())
}
