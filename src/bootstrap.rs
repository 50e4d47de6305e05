use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::{
    api::handler::AppState, config::Config, error::AppResult, ledger::repository::LedgerRepository,
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let pool = initialize_database(&config.database_url).await?;

    let ledger = Arc::new(LedgerRepository::new(pool));
    info!("✅ Ledger repository initialized");

    if config.accrual_address.is_empty() {
        warn!("⚠️  ACCRUAL_SYSTEM_ADDRESS not set - accrual polling will fail until configured");
    }

    Ok(AppState {
        ledger,
        jwt_secret: config.jwt_secret.clone(),
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(30)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
