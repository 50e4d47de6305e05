use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{
        create_order, get_balance, get_orders, get_withdrawals, health_check, login, register,
        withdraw, AppState,
    },
    middleware::require_auth,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let protected = Router::new()
        .route("/orders", post(create_order).get(get_orders))
        .route("/balance", get(get_balance))
        .route("/balance/withdraw", post(withdraw))
        .route("/withdrawals", get(get_withdrawals))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let app = Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/user",
            Router::new()
                .route("/register", post(register))
                .route("/login", post(login))
                .merge(protected),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}
