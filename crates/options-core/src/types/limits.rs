//! Process-wide risk limits.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;

/// Hot-reloadable risk limits read by every admission check. Mutated only
/// through `RiskLedger::update_limits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum simultaneously open positions.
    pub max_open_positions: usize,
    /// Daily realized-loss floor; admission stops at or beyond it.
    pub max_daily_loss: Decimal,
    /// Maximum size of a single position, in lots.
    pub max_position_size: u32,
    /// Maximum aggregate net premium at risk across open positions.
    pub max_exposure: Decimal,
    /// Per-trade loss that forces the position closed.
    pub max_loss_per_trade: Decimal,
    /// Aggregate daily loss that forces everything closed.
    pub panic_loss_threshold: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_open_positions: 10,
            max_daily_loss: Decimal::new(50_000, 0),
            max_position_size: 20,
            max_exposure: Decimal::new(500_000, 0),
            max_loss_per_trade: Decimal::new(15_000, 0),
            panic_loss_threshold: Decimal::new(75_000, 0),
        }
    }
}

impl RiskLimits {
    /// Load limits from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_open_positions: env_or("RISK_MAX_OPEN_POSITIONS", defaults.max_open_positions),
            max_daily_loss: env_or("RISK_MAX_DAILY_LOSS", defaults.max_daily_loss),
            max_position_size: env_or("RISK_MAX_POSITION_SIZE", defaults.max_position_size),
            max_exposure: env_or("RISK_MAX_EXPOSURE", defaults.max_exposure),
            max_loss_per_trade: env_or("RISK_MAX_LOSS_PER_TRADE", defaults.max_loss_per_trade),
            panic_loss_threshold: env_or("RISK_PANIC_LOSS_THRESHOLD", defaults.panic_loss_threshold),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
