//! Entry signals handed to the engine by the signal layer.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::option::OptionType;

/// Strategy that originated an entry signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Breakout,
    MeanRevert,
    TrendFollow,
    Manual,
}

/// How the protective hedge strike is chosen for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HedgeMode {
    /// Fixed strike distance from the main strike.
    Offset(Decimal),
    /// Target hedge premium as a percentage of the main premium (e.g. 30).
    PremiumPct(Decimal),
}

/// A request to open one hedged position: sell the main leg, buy a hedge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySignal {
    pub signal_type: SignalType,
    pub symbol: String,
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    /// Main leg strike.
    pub strike: Decimal,
    /// Quantity in lots (same for both legs).
    pub quantity: u32,
    /// Main premium the signal was computed at.
    pub signal_price: Decimal,
    pub hedge_mode: HedgeMode,
    pub received_at: DateTime<Utc>,
}

impl EntrySignal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        signal_type: SignalType,
        symbol: impl Into<String>,
        expiry: NaiveDate,
        option_type: OptionType,
        strike: Decimal,
        quantity: u32,
        signal_price: Decimal,
        hedge_mode: HedgeMode,
    ) -> Self {
        Self {
            signal_type,
            symbol: symbol.into(),
            expiry,
            option_type,
            strike,
            quantity,
            signal_price,
            hedge_mode,
            received_at: Utc::now(),
        }
    }
}
