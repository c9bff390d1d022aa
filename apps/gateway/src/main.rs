//! # Tollgate Gateway
//!
//! The main entry point for the demo gateway: loads the gate configuration,
//! connects to the backing store, and serves a couple of upstream routes
//! behind the tollgate middleware.

use actix_web::{App, HttpServer};
use tracing_actix_web::TracingLogger;

mod config;
mod handlers;
mod telemetry;

use config::AppConfig;
use tollgate_middleware::Tollgate;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    telemetry::init_telemetry(&telemetry::TelemetryConfig::from_env());

    let config = AppConfig::from_env();
    let gate_config = config.load_gate_config()?;

    tracing::info!(
        "Starting tollgate gateway on {}:{}",
        config.host,
        config.port
    );

    let gate = Tollgate::connect(gate_config, "gateway")
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(gate.clone())
            .configure(handlers::configure_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
