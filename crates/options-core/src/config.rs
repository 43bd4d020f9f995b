//! Configuration management for the hedged options engine.

use crate::{Error, Result};
use serde::Deserialize;
use std::env;

/// Infrastructure configuration. Component tunables (risk limits, stop
/// parameters, gate thresholds) live with their components.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Optional Postgres order store; without it the in-memory store is used.
    pub database: Option<DatabaseConfig>,
    pub redis: RedisConfig,
    pub alerts: AlertsConfig,
    /// Contract multiplier for the traded underlying.
    pub lot_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub discord_webhook_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database = env::var("DATABASE_URL").ok().map(|url| DatabaseConfig {
            url,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        });

        let lot_size: u32 = env::var("LOT_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50);
        if lot_size == 0 {
            return Err(Error::Config {
                message: "LOT_SIZE must be positive".to_string(),
            });
        }

        Ok(Self {
            database,
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            alerts: AlertsConfig {
                telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
                telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),
                discord_webhook_url: env::var("DISCORD_WEBHOOK_URL").ok(),
            },
            lot_size,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: None,
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            alerts: AlertsConfig::default(),
            lot_size: 50,
        }
    }
}
