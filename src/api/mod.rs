//! Thin pass-through HTTP API (§6): one `axum::Router<AppState>` nested
//! under a versioned prefix, with the teacher's middleware stack.
//!
//! Grounded on the teacher's `api/mod.rs::create_app()` (`TraceLayer` +
//! `CompressionLayer` + permissive `CorsLayer`), minus the static-dashboard
//! routes this core does not serve.

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::AppState;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
