//! In-process API regression tests: build the Axum app via `create_app()`
//! and exercise `/api/v1/*` with `tower::ServiceExt::oneshot()`. No binary
//! spawn, no network port.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use urban_grid_os::api::{create_app, AppState};
use urban_grid_os::catalog::GroundingCatalog;
use urban_grid_os::engine::ZoneProcessingEngine;
use urban_grid_os::providers::TariffProvider;
use urban_grid_os::scenario::ScenarioOrchestrator;
use urban_grid_os::scheduler::BackgroundScheduler;
use urban_grid_os::storage::StateStore;

fn test_state() -> AppState {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(dir.path()).unwrap();
    let catalog_db = Arc::new(sled::open(dir.path().join("catalog")).unwrap());
    let catalog = GroundingCatalog::new(catalog_db);

    let engine = Arc::new(ZoneProcessingEngine::new(store.clone()));
    let initial_city = urban_grid_os::cities::find("nyc").unwrap().clone();
    let scheduler = Arc::new(BackgroundScheduler::new(Arc::clone(&engine), initial_city));
    let orchestrator = Arc::new(ScenarioOrchestrator::new(store.clone(), catalog));

    // Leak the tempdir so the sled databases outlive the test body.
    std::mem::forget(dir);

    AppState {
        store,
        engine,
        scheduler,
        orchestrator,
        tariff: Arc::new(TariffProvider::new()),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn list_cities_returns_six() {
    let app = create_app(test_state());
    let response = app
        .oneshot(Request::builder().uri("/api/v1/cities").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 6);
    assert!(body["error"].is_null());
}

#[tokio::test]
async fn unknown_city_is_a_validation_error() {
    let app = create_app(test_state());
    let response = app
        .oneshot(Request::builder().uri("/api/v1/cities/atlantis").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn city_id_lookup_is_case_insensitive() {
    let app = create_app(test_state());
    let response = app
        .oneshot(Request::builder().uri("/api/v1/cities/NYC").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["id"], "nyc");
}

#[tokio::test]
async fn process_then_query_snapshots_round_trips() {
    let app = create_app(test_state());

    let process = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/cities/sf/process")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(process.status(), StatusCode::OK);
    let summary = body_json(process).await;
    assert!(summary["data"]["total"].as_u64().unwrap() > 0);

    let snapshots = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/cities/sf/snapshots")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(snapshots.status(), StatusCode::OK);
    let body = body_json(snapshots).await;
    assert!(!body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn scenario_message_without_city_gets_a_prompt_to_select_one() {
    let app = create_app(test_state());
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/scenario/message")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "session_id": "test-session",
                "city_id": null,
                "zone_id": null,
                "message": "there is a power outage",
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["data"]["assistant_reply"].as_str().unwrap().contains("city"));
}

#[tokio::test]
async fn agent_run_is_persisted_and_fetchable_by_id() {
    let app = create_app(test_state());

    let start = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/scenario/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let start_body = body_json(start).await;
    let session_id = start_body["data"]["session_id"].as_str().unwrap().to_string();

    let message = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/scenario/message")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "session_id": session_id,
                        "city_id": "nyc",
                        "zone_id": "Z_001",
                        "message": "there is a power outage",
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(message.status(), StatusCode::OK);

    let runs = app
        .clone()
        .oneshot(Request::builder().uri("/api/v1/agent-runs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let runs_body = body_json(runs).await;
    assert_eq!(runs_body["data"].as_array().unwrap().len(), 1);
    let run_id = runs_body["data"][0]["run_id"].as_str().unwrap();

    let fetched = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/agent-runs/{run_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
    let fetched_body = body_json(fetched).await;
    assert_eq!(fetched_body["data"]["run_id"], run_id);
}
