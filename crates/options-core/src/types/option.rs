//! Option contract and leg types.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::order::OrderSide;

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Short suffix used in instrument identifiers.
    pub fn suffix(&self) -> &'static str {
        match self {
            OptionType::Call => "CE",
            OptionType::Put => "PE",
        }
    }
}

/// A single option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    /// Underlying symbol (e.g. "NIFTY").
    pub symbol: String,
    pub strike: Decimal,
    pub option_type: OptionType,
    pub expiry: NaiveDate,
}

impl OptionContract {
    pub fn new(
        symbol: impl Into<String>,
        strike: Decimal,
        option_type: OptionType,
        expiry: NaiveDate,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            strike,
            option_type,
            expiry,
        }
    }

    /// Canonical broker-facing instrument key.
    pub fn instrument_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.symbol,
            self.expiry.format("%y%m%d"),
            self.strike,
            self.option_type.suffix()
        )
    }
}

/// One leg of a hedged position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionLeg {
    pub contract: OptionContract,
    pub side: OrderSide,
    /// Premium at entry.
    pub entry_price: Decimal,
    /// Quantity in lots.
    pub quantity: u32,
    /// Last observed premium.
    pub current_price: Decimal,
}

impl OptionLeg {
    pub fn new(contract: OptionContract, side: OrderSide, entry_price: Decimal, quantity: u32) -> Self {
        Self {
            contract,
            side,
            entry_price,
            quantity,
            current_price: entry_price,
        }
    }

    /// Premium notional of this leg at entry (price x lots x lot size).
    pub fn premium_value(&self, lot_size: u32) -> Decimal {
        self.entry_price * Decimal::from(self.quantity as u64 * lot_size as u64)
    }

    /// Unrealized P&L of this leg at a live premium. Sold legs profit when the
    /// premium falls, bought legs when it rises.
    pub fn unrealized_pnl(&self, live_price: Decimal, lot_size: u32) -> Decimal {
        let units = Decimal::from(self.quantity as u64 * lot_size as u64);
        match self.side {
            OrderSide::Sell => (self.entry_price - live_price) * units,
            OrderSide::Buy => (live_price - self.entry_price) * units,
        }
    }
}
