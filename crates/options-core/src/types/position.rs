//! Hedged position lifecycle types.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::option::OptionLeg;
use crate::types::signal::SignalType;

/// Lifecycle status of a hedged position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
    Cancelled,
}

/// Progressive stop-loss stage. Ordering is the progression order: a
/// position's stage is monotonically non-decreasing for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStage {
    Initial,
    ProfitLocked,
    Day2,
    Breakeven,
    Day4Lock,
}

/// Current stop-loss rule of a position: the stage and the P&L level at or
/// below which the position exits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopLossState {
    pub stage: StopStage,
    pub trigger_pnl: Decimal,
}

impl Default for StopLossState {
    fn default() -> Self {
        Self {
            stage: StopStage::Initial,
            trigger_pnl: Decimal::ZERO,
        }
    }
}

/// An unrealized P&L observation stamped with the time of the price it was
/// computed from. Derived, never ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnlSample {
    pub value: Decimal,
    pub priced_at: DateTime<Utc>,
}

/// One hedged trade: a sold main leg plus an optional bought hedge leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgedPosition {
    pub id: Uuid,
    pub signal_type: SignalType,
    pub main_leg: OptionLeg,
    /// Always the opposite transaction direction of the main leg.
    pub hedge_leg: Option<OptionLeg>,
    /// Contract multiplier used for all notional math.
    pub lot_size: u32,
    /// Net premium at risk. Computed once at entry, immutable thereafter.
    pub net_exposure: Decimal,
    pub stop_state: StopLossState,
    pub status: PositionStatus,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,
    /// Last unrealized P&L sample.
    pub last_pnl: Option<PnlSample>,
}

impl HedgedPosition {
    pub fn new(
        signal_type: SignalType,
        main_leg: OptionLeg,
        hedge_leg: Option<OptionLeg>,
        lot_size: u32,
    ) -> Self {
        let net_exposure = Self::net_exposure_of(&main_leg, hedge_leg.as_ref(), lot_size);
        Self {
            id: Uuid::new_v4(),
            signal_type,
            main_leg,
            hedge_leg,
            lot_size,
            net_exposure,
            stop_state: StopLossState::default(),
            status: PositionStatus::Open,
            entry_time: Utc::now(),
            exit_time: None,
            realized_pnl: None,
            last_pnl: None,
        }
    }

    /// Net premium at risk: main premium minus hedge cost, lot-size scaled.
    pub fn net_exposure_of(main: &OptionLeg, hedge: Option<&OptionLeg>, lot_size: u32) -> Decimal {
        let hedge_value = hedge
            .map(|h| h.premium_value(lot_size))
            .unwrap_or(Decimal::ZERO);
        main.premium_value(lot_size) - hedge_value
    }

    /// Position size in lots (both legs carry the same quantity).
    pub fn lots(&self) -> u32 {
        self.main_leg.quantity
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Combined unrealized P&L at the given leg premiums.
    pub fn unrealized_pnl(&self, main_price: Decimal, hedge_price: Option<Decimal>) -> Decimal {
        let mut pnl = self.main_leg.unrealized_pnl(main_price, self.lot_size);
        if let (Some(leg), Some(price)) = (&self.hedge_leg, hedge_price) {
            pnl += leg.unrealized_pnl(price, self.lot_size);
        }
        pnl
    }

    /// Record a price observation on both legs and store the timestamped
    /// P&L sample. Returns the unrealized P&L.
    pub fn mark_price(
        &mut self,
        main_price: Decimal,
        hedge_price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Decimal {
        self.main_leg.current_price = main_price;
        if let (Some(leg), Some(price)) = (self.hedge_leg.as_mut(), hedge_price) {
            leg.current_price = price;
        }
        let value = self.unrealized_pnl(main_price, hedge_price);
        self.last_pnl = Some(PnlSample {
            value,
            priced_at: at,
        });
        value
    }

    /// Trading-day age of the position; the entry day counts as day 1.
    pub fn trading_days_open(&self, today: NaiveDate) -> u32 {
        trading_days_between(self.entry_time.date_naive(), today)
    }

    /// Close the position with its final P&L.
    /// Only valid from Open state.
    pub fn close(&mut self, realized_pnl: Decimal) -> std::result::Result<(), String> {
        if self.status != PositionStatus::Open {
            return Err(format!(
                "Cannot close position from {:?} (expected Open)",
                self.status
            ));
        }
        self.status = PositionStatus::Closed;
        self.exit_time = Some(Utc::now());
        self.realized_pnl = Some(realized_pnl);
        Ok(())
    }

    /// Cancel a position whose entry never completed.
    /// Only valid from Open state.
    pub fn cancel(&mut self) -> std::result::Result<(), String> {
        if self.status != PositionStatus::Open {
            return Err(format!(
                "Cannot cancel position from {:?} (expected Open)",
                self.status
            ));
        }
        self.status = PositionStatus::Cancelled;
        self.exit_time = Some(Utc::now());
        Ok(())
    }
}

/// Count trading days (weekdays) in `[from, to]`, both inclusive.
/// Returns 0 when `to` is before `from`.
pub fn trading_days_between(from: NaiveDate, to: NaiveDate) -> u32 {
    if to < from {
        return 0;
    }
    let mut days = 0;
    let mut current = from;
    loop {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            days += 1;
        }
        if current >= to {
            break;
        }
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    days
}
