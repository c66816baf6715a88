//! Blood matching & inventory engine — entry point.
//!
//! Starts the background expiry sweeper that ages out stale blood units and
//! exposes the Axum REST API consumed by the hospital and public frontends.

mod api;
mod blood;
mod config;
mod db;
mod donors;
mod errors;
mod inventory;
mod matching;
mod models;
mod network;
mod requests;
mod sweeper;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use sweeper::SweeperState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // ─── Background expiry sweeper ────────────────────────
    let sweeper_state = Arc::new(SweeperState {
        pool: pool.clone(),
        config: config.clone(),
    });
    tokio::spawn(sweeper::run(sweeper_state));

    // ─── REST API ─────────────────────────────────────────
    let api_port = config.api_port;
    let api_state = Arc::new(api::ApiState { pool, config });

    let app = Router::new()
        .route("/health", get(api::health))
        // Public intake
        .route("/api/public/donors", post(api::create_donor))
        .route("/api/public/donations", post(api::create_donation))
        .route("/api/public/blood-requests", post(api::create_blood_request))
        // Donor catalog & matching
        .route("/api/hospital/donors", get(api::list_donors))
        .route("/api/hospital/donors/matching", get(api::matching_donors))
        .route(
            "/api/hospital/blood-requests/:id/compatible-donors",
            get(api::compatible_donors),
        )
        .route("/api/hospital/matching/overview", get(api::matching_overview))
        .route("/api/hospital/matching/summary", get(api::matching_summary))
        // Inventory
        .route("/api/hospital/inventory", get(api::list_inventory))
        .route("/api/hospital/inventory/summary", get(api::inventory_summary))
        .route("/api/hospital/inventory/alerts", get(api::inventory_alerts))
        .route("/api/hospital/inventory/unit/:id", put(api::update_unit_status))
        .route(
            "/api/hospital/inventory/convert/:donation_id",
            post(api::convert_donation),
        )
        .route("/api/hospital/inventory/mark-expired", post(api::mark_expired))
        .route("/api/hospital/donations/:id", get(api::get_donation))
        .route("/api/hospital/donations/:id/review", put(api::review_donation))
        // Blood request registry
        .route("/api/hospital/blood-requests/:id", get(api::get_blood_request))
        .route(
            "/api/hospital/blood-requests/:id/status",
            put(api::update_request_status),
        )
        // Hospital-to-hospital network
        .route(
            "/api/hospital/requests",
            get(api::list_hospital_requests).post(api::create_hospital_request),
        )
        .route(
            "/api/hospital/requests/available",
            get(api::available_hospital_requests),
        )
        .route("/api/hospital/requests/mine", get(api::my_hospital_requests))
        .route("/api/hospital/requests/:id", get(api::get_hospital_request))
        .route(
            "/api/hospital/requests/:id/respond",
            post(api::respond_to_request),
        )
        .route(
            "/api/hospital/requests/:id/cancel",
            post(api::cancel_hospital_request),
        )
        .route("/api/hospital/responses/:id/delivered", put(api::confirm_delivery))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{api_port}");
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
