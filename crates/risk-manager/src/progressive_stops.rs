//! Progressive stop-loss engine.
//!
//! Per-position stage machine that tightens the stop trigger as trading days
//! pass and locks profit once it appears. Stages only ever advance.

use chrono::NaiveDate;
use options_core::types::{HedgedPosition, StopLossState, StopStage};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

/// Stop-loss tuning. The reference maximum used by the profit-lock and
/// day-4 rules is the position's net premium collected (`net_exposure`),
/// i.e. the maximum achievable profit of the credit structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConfig {
    /// Initial stop-loss per lot, in currency.
    pub initial_sl_per_lot: Decimal,
    /// Percent of the reference maximum that locks breakeven (e.g. 40).
    pub profit_trigger_pct: Decimal,
    /// Fraction of the initial stop retained on day 2, in (0, 1).
    pub day2_factor: Decimal,
    /// Whether day 3 forces the trigger to breakeven.
    pub day3_breakeven: bool,
    /// Percent of the reference maximum locked as profit from day 4 (e.g. 25).
    pub day4_profit_lock_pct: Decimal,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            initial_sl_per_lot: Decimal::new(6000, 0),
            profit_trigger_pct: Decimal::new(40, 0),
            day2_factor: Decimal::new(5, 1), // 0.5
            day3_breakeven: true,
            day4_profit_lock_pct: Decimal::new(25, 0),
        }
    }
}

impl StopConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            initial_sl_per_lot: env_or("STOP_INITIAL_SL_PER_LOT", defaults.initial_sl_per_lot),
            profit_trigger_pct: env_or("STOP_PROFIT_TRIGGER_PCT", defaults.profit_trigger_pct),
            day2_factor: env_or("STOP_DAY2_FACTOR", defaults.day2_factor),
            day3_breakeven: env_or("STOP_DAY3_BREAKEVEN", defaults.day3_breakeven),
            day4_profit_lock_pct: env_or(
                "STOP_DAY4_PROFIT_LOCK_PCT",
                defaults.day4_profit_lock_pct,
            ),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Result of one evaluation tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopEvaluation {
    /// The stage and trigger the position should now carry.
    pub state: StopLossState,
    /// True when live P&L is at or below the trigger.
    pub should_exit: bool,
}

/// Evaluates the INITIAL -> PROFIT_LOCKED -> DAY2 -> BREAKEVEN -> DAY4_LOCK
/// progression for open positions.
#[derive(Debug, Clone)]
pub struct ProgressiveStopEngine {
    config: StopConfig,
}

impl ProgressiveStopEngine {
    pub fn new(config: StopConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StopConfig {
        &self.config
    }

    /// Evaluate one position against its live unrealized P&L on `today`.
    /// The returned stage is never earlier than the position's current stage.
    pub fn evaluate(
        &self,
        position: &HedgedPosition,
        unrealized_pnl: Decimal,
        today: NaiveDate,
    ) -> StopEvaluation {
        let lots = Decimal::from(position.lots());
        let reference = position.net_exposure;
        let days = position.trading_days_open(today);
        let hundred = Decimal::new(100, 0);

        let mut stage = position.stop_state.stage;

        // Profit lock applies from the initial stage only.
        if stage == StopStage::Initial
            && reference > Decimal::ZERO
            && unrealized_pnl >= reference * self.config.profit_trigger_pct / hundred
        {
            stage = StopStage::ProfitLocked;
        }
        // Day 2 tightening is skipped once profit is locked.
        if days == 2 && stage < StopStage::ProfitLocked {
            stage = StopStage::Day2;
        }
        if days == 3 && self.config.day3_breakeven && stage < StopStage::Breakeven {
            stage = StopStage::Breakeven;
        }
        if days >= 4 && stage < StopStage::Day4Lock {
            stage = StopStage::Day4Lock;
        }

        let trigger_pnl = match stage {
            StopStage::Initial => -(self.config.initial_sl_per_lot * lots),
            StopStage::ProfitLocked | StopStage::Breakeven => Decimal::ZERO,
            StopStage::Day2 => -(self.config.initial_sl_per_lot * lots * self.config.day2_factor),
            StopStage::Day4Lock => reference * self.config.day4_profit_lock_pct / hundred,
        };

        if stage != position.stop_state.stage {
            debug!(
                position_id = %position.id,
                from = ?position.stop_state.stage,
                to = ?stage,
                trigger = %trigger_pnl,
                "Stop stage advanced"
            );
        }

        StopEvaluation {
            state: StopLossState { stage, trigger_pnl },
            should_exit: unrealized_pnl <= trigger_pnl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use options_core::types::{
        OptionContract, OptionLeg, OptionType, OrderSide, SignalType,
    };

    /// Sold 10-lot main leg at 200, lot size 50: reference max = 100,000.
    fn position() -> HedgedPosition {
        HedgedPosition::new(
            SignalType::Breakout,
            OptionLeg::new(
                OptionContract::new(
                    "NIFTY",
                    Decimal::new(22_500, 0),
                    OptionType::Put,
                    NaiveDate::from_ymd_opt(2025, 8, 28).unwrap(),
                ),
                OrderSide::Sell,
                Decimal::new(200, 0),
                10,
            ),
            None,
            50,
        )
    }

    /// A position entered on a Monday, evaluated `weekdays_ago` days later
    /// within the same week so weekends never interfere.
    fn position_entered_days_ago(weekdays_ago: i64) -> (HedgedPosition, NaiveDate) {
        let mut pos = position();
        let monday = NaiveDate::from_ymd_opt(2025, 8, 4).unwrap();
        pos.entry_time = monday.and_hms_opt(9, 20, 0).unwrap().and_utc();
        let today = monday + Duration::days(weekdays_ago);
        (pos, today)
    }

    fn engine() -> ProgressiveStopEngine {
        ProgressiveStopEngine::new(StopConfig::default())
    }

    #[test]
    fn test_initial_trigger_scales_with_lots() {
        let (pos, today) = position_entered_days_ago(0);
        let eval = engine().evaluate(&pos, Decimal::ZERO, today);

        assert_eq!(eval.state.stage, StopStage::Initial);
        assert_eq!(eval.state.trigger_pnl, Decimal::new(-60_000, 0));
        assert!(!eval.should_exit);
    }

    #[test]
    fn test_initial_stop_exit() {
        let (pos, today) = position_entered_days_ago(0);
        let eval = engine().evaluate(&pos, Decimal::new(-60_000, 0), today);
        assert!(eval.should_exit);
    }

    #[test]
    fn test_profit_lock_at_trigger_percent() {
        // 45% of the 100,000 reference with a 40% trigger locks breakeven
        let (pos, today) = position_entered_days_ago(0);
        let eval = engine().evaluate(&pos, Decimal::new(45_000, 0), today);

        assert_eq!(eval.state.stage, StopStage::ProfitLocked);
        assert_eq!(eval.state.trigger_pnl, Decimal::ZERO);
        assert!(!eval.should_exit);

        // Below the trigger percent the stage stays initial
        let eval = engine().evaluate(&pos, Decimal::new(39_000, 0), today);
        assert_eq!(eval.state.stage, StopStage::Initial);
    }

    #[test]
    fn test_day2_tightens_unless_profit_locked() {
        let (mut pos, today) = position_entered_days_ago(1);
        let eval = engine().evaluate(&pos, Decimal::new(1000, 0), today);
        assert_eq!(eval.state.stage, StopStage::Day2);
        // Half of the initial 60,000 stop
        assert_eq!(eval.state.trigger_pnl, Decimal::new(-30_000, 0));

        // A profit-locked position never loosens back to the day-2 trigger
        pos.stop_state.stage = StopStage::ProfitLocked;
        pos.stop_state.trigger_pnl = Decimal::ZERO;
        let eval = engine().evaluate(&pos, Decimal::new(1000, 0), today);
        assert_eq!(eval.state.stage, StopStage::ProfitLocked);
        assert_eq!(eval.state.trigger_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_day3_breakeven_unconditional() {
        let (pos, today) = position_entered_days_ago(2);
        let eval = engine().evaluate(&pos, Decimal::new(-5000, 0), today);
        assert_eq!(eval.state.stage, StopStage::Breakeven);
        assert_eq!(eval.state.trigger_pnl, Decimal::ZERO);
        // Losing position on day 3 exits at breakeven
        assert!(eval.should_exit);
    }

    #[test]
    fn test_day3_breakeven_disabled() {
        let config = StopConfig {
            day3_breakeven: false,
            ..Default::default()
        };
        let (pos, today) = position_entered_days_ago(2);
        let eval = ProgressiveStopEngine::new(config).evaluate(&pos, Decimal::new(-5000, 0), today);
        // Without the day-3 rule the position keeps its prior-stage trigger
        assert_ne!(eval.state.stage, StopStage::Breakeven);
    }

    #[test]
    fn test_day4_locks_profit_floor() {
        let (pos, today) = position_entered_days_ago(3);
        let eval = engine().evaluate(&pos, Decimal::new(40_000, 0), today);

        assert_eq!(eval.state.stage, StopStage::Day4Lock);
        // 25% of the 100,000 reference
        assert_eq!(eval.state.trigger_pnl, Decimal::new(25_000, 0));
        assert!(!eval.should_exit);

        // Profit decaying to the floor exits with locked gains
        let eval = engine().evaluate(&pos, Decimal::new(25_000, 0), today);
        assert!(eval.should_exit);
    }

    #[test]
    fn test_stage_is_monotonic_over_day_sequence() {
        let (mut pos, start) = position_entered_days_ago(0);
        let mut last_stage = pos.stop_state.stage;

        // Walk the same position through five consecutive weekdays with a
        // P&L path that dips and recovers; stages must never regress.
        let pnls = [
            Decimal::new(-10_000, 0),
            Decimal::new(45_000, 0),
            Decimal::new(5_000, 0),
            Decimal::new(30_000, 0),
            Decimal::new(26_000, 0),
        ];
        for (offset, pnl) in pnls.iter().enumerate() {
            let today = start + Duration::days(offset as i64);
            let eval = engine().evaluate(&pos, *pnl, today);
            assert!(
                eval.state.stage >= last_stage,
                "stage regressed from {:?} to {:?} on day {}",
                last_stage,
                eval.state.stage,
                offset + 1
            );
            last_stage = eval.state.stage;
            pos.stop_state = eval.state;
        }
        assert_eq!(last_stage, StopStage::Day4Lock);
    }

    #[test]
    fn test_weekend_does_not_advance_days() {
        let mut pos = position();
        // Entry on Friday 2025-08-08; Monday is trading day 2, not day 4
        pos.entry_time = NaiveDate::from_ymd_opt(2025, 8, 8)
            .unwrap()
            .and_hms_opt(9, 20, 0)
            .unwrap()
            .and_utc();
        let monday = NaiveDate::from_ymd_opt(2025, 8, 11).unwrap();

        let eval = engine().evaluate(&pos, Decimal::ZERO, monday);
        assert_eq!(eval.state.stage, StopStage::Day2);
    }
}
