//! Urban Grid OS entry point.
//!
//! Wires the state store, providers, processing engine, scheduler, grounding
//! catalog, scenario orchestrator and HTTP API together, then serves the
//! router until a shutdown signal arrives.
//!
//! # Environment variables
//!
//! - `GRID_BUS_ADDR`: message bus bootstrap address
//! - `GRID_STATE_STORE_URI`: filesystem path for the sled state store
//! - `GRID_DEFAULT_CITY`: city slug selected at startup
//! - `GRID_CYCLE_INTERVAL_SECS`: background scheduler cycle interval
//! - `GRID_SERVER_ADDR`: HTTP bind address
//! - `RUST_LOG`: tracing filter (default: info)
//! - `RESET_DB`: set to "true" to wipe the state store on startup

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use urban_grid_os::api::{self, AppState};
use urban_grid_os::catalog::GroundingCatalog;
use urban_grid_os::config::{self, AppConfig};
use urban_grid_os::engine::ZoneProcessingEngine;
use urban_grid_os::providers::TariffProvider;
use urban_grid_os::scenario::ScenarioOrchestrator;
use urban_grid_os::scheduler::BackgroundScheduler;
use urban_grid_os::storage::StateStore;
use urban_grid_os::streaming::{nats_bus::NatsBus, StreamingIngester};

#[derive(Parser, Debug)]
#[command(name = "urban-grid-os")]
#[command(about = "Urban grid telemetry, fusion and decision-support backend")]
#[command(version)]
struct CliArgs {
    /// Override the HTTP bind address (default: value of GRID_SERVER_ADDR)
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the default city slug (default: value of GRID_DEFAULT_CITY)
    #[arg(long)]
    city: Option<String>,

    /// Wipe the state store directory on startup.
    /// Can also be set via RESET_DB=true.
    #[arg(long)]
    reset_db: bool,
}

fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    std::env::var("RESET_DB")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn reset_data_directory(path: &str) -> Result<()> {
    let data_path = std::path::Path::new(path);
    if !data_path.exists() {
        info!("state store path does not exist, nothing to reset");
        return Ok(());
    }
    warn!(path = %path, "RESET_DB set - wiping persistent state store");
    std::fs::remove_dir_all(data_path).context("failed to remove state store directory")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .json()
        .init();

    let args = CliArgs::parse();
    let env_config = AppConfig::from_env();

    if should_reset_db(args.reset_db) {
        reset_data_directory(&env_config.state_store_path)?;
    }
    config::init(env_config.clone());

    let server_addr = args.addr.unwrap_or_else(|| env_config.http_addr.clone());
    let city_slug = args.city.unwrap_or_else(|| env_config.default_city.clone());
    let initial_city = urban_grid_os::cities::find(&city_slug)
        .cloned()
        .with_context(|| format!("unknown default city: {city_slug}"))?;

    info!("urban grid os starting up");

    let store = StateStore::open(&env_config.state_store_path)
        .with_context(|| format!("failed to open state store at {}", env_config.state_store_path))?;

    let catalog_db = std::sync::Arc::new(
        sled::open(format!("{}-catalog", env_config.state_store_path))
            .context("failed to open grounding catalog database")?,
    );
    let catalog = GroundingCatalog::new(catalog_db);

    let tariff = Arc::new(TariffProvider::new());
    let engine = Arc::new(ZoneProcessingEngine::new(store.clone()));
    let scheduler = Arc::new(BackgroundScheduler::new(Arc::clone(&engine), initial_city));
    let orchestrator = Arc::new(ScenarioOrchestrator::new(store.clone(), catalog));

    let cancel_token = CancellationToken::new();

    let shutdown_signal = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown_signal.cancel();
    });

    scheduler
        .start(Duration::from_secs(env_config.cycle_interval_secs))
        .await;

    let streaming_cancel = cancel_token.clone();
    let streaming_store = store.clone();
    let bus_addr = env_config.bus_addr.clone();
    let streaming_handle = tokio::spawn(async move {
        let bus = match NatsBus::connect(&bus_addr).await {
            Ok(bus) => bus,
            Err(e) => {
                warn!(error = %e, "streaming ingester disabled: could not connect to message bus");
                return;
            }
        };
        let ingester = StreamingIngester::new(bus, streaming_store);
        if let Err(e) = ingester.run(streaming_cancel).await {
            error!(error = %e, "streaming ingester stopped with an error");
        }
    });

    let app_state = AppState {
        store,
        engine,
        scheduler: Arc::clone(&scheduler),
        orchestrator,
        tariff,
    };
    let app = api::create_app(app_state);

    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("failed to bind to {server_addr}"))?;
    info!(addr = %server_addr, "http server listening");

    let server_cancel = cancel_token.clone();
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            server_cancel.cancelled().await;
            info!("http server shutting down");
        })
        .await;

    scheduler.stop().await;
    let _ = streaming_handle.await;

    if let Err(e) = serve_result {
        error!(error = %e, "http server exited with an error");
        return Err(e.into());
    }

    info!("urban grid os shutdown complete");
    Ok(())
}
