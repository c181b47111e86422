//! Route table for the §6 HTTP surface.
//!
//! Grounded on the teacher's `api/routes.rs`: one `Router<AppState>` built
//! with `.route(path, method(handler))`, nested under a versioned prefix
//! in `mod.rs`.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, AppState};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/cities", get(handlers::list_cities))
        .route("/cities/current", get(handlers::current_city))
        .route("/cities/:city_id", get(handlers::get_city))
        .route("/cities/:city_id/select", post(handlers::select_city))
        .route("/cities/:city_id/process", post(handlers::process_city))
        .route(
            "/cities/:city_id/process/stream",
            post(handlers::process_city_stream),
        )
        .route("/cities/:city_id/snapshots", get(handlers::latest_snapshots))
        .route("/cities/:city_id/cost", get(handlers::city_cost))
        .route("/alerts", get(handlers::query_alerts))
        .route("/scenario/start", post(handlers::start_scenario))
        .route("/scenario/message", post(handlers::scenario_message))
        .route("/agent-runs", get(handlers::list_agent_runs))
        .route("/agent-runs/:run_id", get(handlers::get_agent_run))
}
