use hl7vg_core::constants::DEFAULT_PROCESS_LIMIT;
use hl7vg_core::{CoreConfig, Hl7Service};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Main entry point for the HL7 value groups application
///
/// Runs concurrently:
/// - the REST server (uploads, queue and error listings, Swagger UI)
/// - the queue poller, which drains pending messages on a fixed interval
///
/// # Environment Variables
/// - `HL7_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `HL7_DATA_DIR`: root directory of the stores (default: "hl7_data")
/// - `HL7_SOURCES`: known sources as `id:name` pairs (default: "1:local")
/// - `HL7_IGNORE_MISSING_NONLOCAL_PATIENTS`: drop messages for unknown patients from
///   non-local sources (default: "false")
/// - `HL7_POLL_INTERVAL_SECS`: seconds between queue polls (default: 5)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("hl7vg=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("HL7_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let poll_interval = match std::env::var("HL7_POLL_INTERVAL_SECS") {
        Ok(value) => value.trim().parse::<u64>()?,
        Err(_) => DEFAULT_POLL_INTERVAL_SECS,
    };
    if poll_interval == 0 {
        anyhow::bail!("HL7_POLL_INTERVAL_SECS must be at least 1");
    }

    let cfg = Arc::new(CoreConfig::from_env_values(
        std::env::var("HL7_DATA_DIR").ok(),
        std::env::var("HL7_IGNORE_MISSING_NONLOCAL_PATIENTS").ok(),
        std::env::var("HL7_SOURCES").ok(),
    )?);
    let service = Arc::new(Hl7Service::open(cfg)?);

    tracing::info!("++ Starting HL7 REST on {}", rest_addr);
    tracing::info!("++ Polling HL7 queue every {}s", poll_interval);

    let rest_app = api_rest::router(service.clone());
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    let rest_server = tokio::spawn(async move { axum::serve(listener, rest_app).await });

    let poller = tokio::spawn(poll_queue(service, Duration::from_secs(poll_interval)));

    let (rest_result, poller_result) = tokio::join!(rest_server, poller);
    rest_result??;
    poller_result?;

    Ok(())
}

/// Drains the queue on every tick.
///
/// Processing is synchronous file I/O, so each pass runs on the blocking thread pool. A failed
/// pass is logged and retried on the next tick.
async fn poll_queue(service: Arc<Hl7Service>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let service = service.clone();
        let pass =
            tokio::task::spawn_blocking(move || service.process_pending(DEFAULT_PROCESS_LIMIT))
                .await;

        match pass {
            Ok(Ok(done)) if !done.is_empty() => {
                tracing::info!("processed {} queued HL7 messages", done.len())
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!("queue pass failed: {}", e),
            Err(e) => tracing::error!("queue pass panicked: {}", e),
        }
    }
}
