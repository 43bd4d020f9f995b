//! Error types for the hedged options engine.

use thiserror::Error;

use crate::types::RejectionClass;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("admission blocked: {reason}")]
    AdmissionBlocked { reason: String },

    #[error("no hedge strike with a usable premium within the search window")]
    HedgeNotFound,

    #[error("slippage rejected: {reason}")]
    SlippageRejected { reason: String },

    #[error("trading paused: {reason}")]
    TradingPaused { reason: String },

    #[error("broker latency {elapsed_ms}ms exceeded ceiling {ceiling_ms}ms")]
    LatencyExceeded { elapsed_ms: u64, ceiling_ms: u64 },

    #[error("order {order_id} rejected ({class:?}): {message}")]
    OrderRejected {
        order_id: String,
        class: RejectionClass,
        message: String,
    },

    #[error("reconciliation mismatch on order {order_id}: internal {internal}, broker {broker}")]
    ReconciliationMismatch {
        order_id: String,
        internal: String,
        broker: String,
    },

    #[error("broker call timed out after {timeout_ms}ms")]
    BrokerTimeout { timeout_ms: u64 },

    #[error("broker error: {0}")]
    Broker(String),

    #[error("market data error: {0}")]
    MarketData(String),

    #[error("Order error: {message}")]
    Order { message: String },

    #[error("Position error: {0}")]
    Position(String),
}

impl Error {
    /// Whether the failure is transient and safe to retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::BrokerTimeout { .. } | Error::Http(_) | Error::Redis(_) => true,
            Error::OrderRejected { class, .. } => class.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
