mod accrual;
mod api;
mod auth;
mod bootstrap;
mod config;
mod error;
mod ledger;
mod luhn;
mod middleware;
mod server;

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::accrual::{AccrualClient, Reconciler};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,loyalty=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("🚀 Starting loyalty points service");

    dotenv::dotenv().ok();
    let config = config::Config::from_env()?;

    let state = bootstrap::initialize_app_state(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Background accrual reconciliation
    let accrual_client = Arc::new(AccrualClient::new(config.accrual_address.clone()));
    let reconciler = Reconciler::new(
        state.ledger.clone(),
        accrual_client,
        Duration::from_secs(config.poll_interval_secs),
    );
    let reconciler_handle = reconciler.start(shutdown_rx.clone());

    // Propagate SIGINT/SIGTERM to the server and the reconciler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutting down gracefully...");
        let _ = shutdown_tx.send(true);
    });

    let app = server::create_app(state).await;
    server::run_server(app, &config.run_address, shutdown_rx).await?;

    let _ = reconciler_handle.await;

    info!("Server exited properly");
    Ok(())
}
