use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub run_address: String,
    pub database_url: String,
    pub accrual_address: String,
    pub jwt_secret: String,
    pub poll_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            run_address: std::env::var("RUN_ADDRESS")
                .unwrap_or_else(|_| "localhost:8080".to_string()),
            database_url: std::env::var("DATABASE_URI")
                .unwrap_or_else(|_| "postgresql://localhost/loyalty".to_string()),
            accrual_address: std::env::var("ACCRUAL_SYSTEM_ADDRESS").unwrap_or_default(),
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "supersecretkey".to_string()),
            poll_interval_secs: std::env::var("ACCRUAL_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        })
    }
}
