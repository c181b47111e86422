//! Request handlers for the minimum HTTP surface in §6. Each handler
//! normalises `city_id` to lowercase, validates inputs, and returns either
//! [`ApiResponse`] or [`ApiErrorResponse`] per the §6/§7 status rule.
//!
//! Grounded on the teacher's `api/handlers.rs` (`State<T>` extractor style,
//! one response struct per endpoint) - pass-through logic only, no routing
//! decisions beyond dispatch to the library functions below.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cities::City;
use crate::cost::CostSummary;
use crate::engine::ZoneProcessingEngine;
use crate::error::CoreError;
use crate::scenario::{ScenarioOrchestrator, ScenarioResponse};
use crate::scheduler::BackgroundScheduler;
use crate::storage::StateStore;
use crate::types::{AlertLevel, ProcessingSummary, ZoneSnapshot};

use super::envelope::{ApiErrorResponse, ApiResponse};

#[derive(Clone)]
pub struct AppState {
    pub store: StateStore,
    pub engine: Arc<ZoneProcessingEngine>,
    pub scheduler: Arc<BackgroundScheduler>,
    pub orchestrator: Arc<ScenarioOrchestrator>,
    pub tariff: Arc<crate::providers::TariffProvider>,
}

fn resolve_city(city_id: &str) -> Result<&'static City, CoreError> {
    crate::cities::find(city_id).ok_or_else(|| CoreError::Validation(format!("unknown city: {city_id}")))
}

// -- cities ----------------------------------------------------------

pub async fn list_cities() -> Response {
    ApiResponse::ok(crate::cities::registry())
}

pub async fn get_city(Path(city_id): Path<String>) -> Response {
    match resolve_city(&city_id) {
        Ok(city) => ApiResponse::ok(city),
        Err(e) => ApiErrorResponse::from_core_error(e),
    }
}

pub async fn select_city(State(state): State<AppState>, Path(city_id): Path<String>) -> Response {
    match resolve_city(&city_id) {
        Ok(city) => {
            state.scheduler.update_city(city.clone());
            ApiResponse::ok(city)
        }
        Err(e) => ApiErrorResponse::from_core_error(e),
    }
}

pub async fn current_city(State(state): State<AppState>) -> Response {
    ApiResponse::ok((*state.scheduler.current_city()).clone())
}

// -- processing --------------------------------------------------------

pub async fn process_city(State(state): State<AppState>, Path(city_id): Path<String>) -> Response {
    match resolve_city(&city_id) {
        Ok(city) => {
            let summary: ProcessingSummary = state.engine.process_city(city).await;
            ApiResponse::ok(summary)
        }
        Err(e) => ApiErrorResponse::from_core_error(e),
    }
}

pub async fn process_city_stream(State(state): State<AppState>, Path(city_id): Path<String>) -> Response {
    match resolve_city(&city_id) {
        Ok(city) => {
            let summary: ProcessingSummary = state.engine.process_city_from_stream(city).await;
            ApiResponse::ok(summary)
        }
        Err(e) => ApiErrorResponse::from_core_error(e),
    }
}

// -- snapshots ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SnapshotsQuery {
    pub zone_id: Option<String>,
    pub limit: Option<usize>,
}

pub async fn latest_snapshots(
    State(state): State<AppState>,
    Path(city_id): Path<String>,
    Query(query): Query<SnapshotsQuery>,
) -> Response {
    if resolve_city(&city_id).is_err() {
        return ApiErrorResponse::from_core_error(CoreError::Validation(format!("unknown city: {city_id}")));
    }
    match state.store.latest_snapshots(&city_id.to_lowercase(), query.limit) {
        Ok(snapshots) => {
            let filtered: Vec<ZoneSnapshot> = match &query.zone_id {
                Some(zone_id) => snapshots.into_iter().filter(|s| &s.zone_id == zone_id).collect(),
                None => snapshots,
            };
            ApiResponse::ok(filtered)
        }
        Err(e) => ApiErrorResponse::from_core_error(CoreError::DatastoreOutage(e.to_string())),
    }
}

// -- alerts --------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub city_id: Option<String>,
    pub level: Option<AlertLevel>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

pub async fn query_alerts(State(state): State<AppState>, Query(query): Query<AlertsQuery>) -> Response {
    let city_id = query.city_id.as_deref().map(str::to_lowercase);
    let result = state.store.query_alerts(
        city_id.as_deref(),
        None,
        query.level,
        query.since,
        query.limit.unwrap_or(50),
    );
    match result {
        Ok(alerts) => ApiResponse::ok(alerts),
        Err(e) => ApiErrorResponse::from_core_error(CoreError::DatastoreOutage(e.to_string())),
    }
}

// -- cost ------------------------------------------------------------

pub async fn city_cost(State(state): State<AppState>, Path(city_id): Path<String>) -> Response {
    let city = match resolve_city(&city_id) {
        Ok(city) => city,
        Err(e) => return ApiErrorResponse::from_core_error(e),
    };
    match tokio::time::timeout(
        Duration::from_secs(crate::config::defaults::PROVIDER_TIMEOUT_SECS),
        crate::cost::compute_for_city(&state.store, &state.tariff, city, 0),
    )
    .await
    {
        Ok(Ok(summary)) => ApiResponse::ok(summary),
        Ok(Err(e)) => ApiErrorResponse::from_core_error(CoreError::DatastoreOutage(e.to_string())),
        Err(_) => ApiResponse::ok(CostSummary {
            total_kwh: 0.0,
            price_per_kwh: crate::config::get().default_price_per_kwh_usd,
            energy_usd: 0.0,
            co2_usd: 0.0,
            aqi_usd: 0.0,
            incident_count: 0,
            incident_usd: 0.0,
            total_usd: 0.0,
        }),
    }
}

// -- scenario ----------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ScenarioSession {
    pub session_id: String,
}

pub async fn start_scenario() -> Response {
    ApiResponse::ok(ScenarioSession {
        session_id: Uuid::new_v4().to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct ScenarioMessageRequest {
    pub session_id: String,
    pub city_id: Option<String>,
    pub zone_id: Option<String>,
    pub message: String,
}

pub async fn scenario_message(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<ScenarioMessageRequest>,
) -> Response {
    let result: Result<ScenarioResponse, _> = state.orchestrator.run(
        &request.session_id,
        request.city_id.as_deref(),
        request.zone_id.as_deref(),
        &request.message,
    );
    match result {
        Ok(response) => {
            let run = crate::storage::AgentRun {
                run_id: Uuid::new_v4().to_string(),
                session_id: request.session_id.clone(),
                city_id: request.city_id.clone().unwrap_or_default().to_lowercase(),
                ts: Utc::now(),
                user_message: request.message.clone(),
                assistant_reply: response.assistant_reply.clone(),
                trace: serde_json::Value::Array(response.trace.clone()),
            };
            if let Err(e) = state.store.write_agent_run(&run) {
                tracing::warn!(error = %e, "failed to persist agent run");
            }
            ApiResponse::ok(response)
        }
        Err(e) => ApiErrorResponse::from_core_error(e.into()),
    }
}

// -- agent runs ----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AgentRunsQuery {
    pub limit: Option<usize>,
}

pub async fn list_agent_runs(State(state): State<AppState>, Query(query): Query<AgentRunsQuery>) -> Response {
    match state.store.list_agent_runs(query.limit.unwrap_or(50)) {
        Ok(runs) => ApiResponse::ok(runs),
        Err(e) => ApiErrorResponse::from_core_error(CoreError::DatastoreOutage(e.to_string())),
    }
}

pub async fn get_agent_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    match state.store.get_agent_run(&run_id) {
        Ok(Some(run)) => ApiResponse::ok(run),
        Ok(None) => ApiErrorResponse::from_core_error(CoreError::Validation(format!("unknown agent run: {run_id}"))),
        Err(e) => ApiErrorResponse::from_core_error(CoreError::DatastoreOutage(e.to_string())),
    }
}
