//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own, without the queue poller.
//!
//! ## Intended use
//! Useful when uploads are accepted on one host and processed elsewhere, or for development
//! with the Swagger UI. The workspace's main `hl7vg-run` binary runs the REST server and the
//! poller together.

use hl7vg_core::{CoreConfig, Hl7Service};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("hl7vg=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("HL7_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let cfg = Arc::new(CoreConfig::from_env_values(
        std::env::var("HL7_DATA_DIR").ok(),
        std::env::var("HL7_IGNORE_MISSING_NONLOCAL_PATIENTS").ok(),
        std::env::var("HL7_SOURCES").ok(),
    )?);
    let service = Arc::new(Hl7Service::open(cfg)?);

    tracing::info!("-- Starting HL7 REST API on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, api_rest::router(service)).await?;

    Ok(())
}
