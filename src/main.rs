use axum::routing::get;
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use wicket::telemetry;

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    let state = match wicket::initialize_state().await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "initialization failed");
            std::process::exit(1);
        },
    };

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(error = %err, "cannot install metrics recorder");
            std::process::exit(1);
        },
    };

    let app = wicket::app(state)
        .route("/metrics", get(move || std::future::ready(metrics.render())));

    let port = std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %port, "cannot bind port");
            std::process::exit(1);
        },
    };

    tracing::info!(%port, "server started");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server stopped");
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("cannot listen for shutdown signal");
    }
}
