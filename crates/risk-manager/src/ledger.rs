//! Risk ledger: open positions, aggregate exposure, and daily P&L.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use options_core::types::{HedgedPosition, RiskLimits, SignalType, StopLossState};
use options_core::{Error, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of an admission pre-check. BLOCK carries the first rule that
/// failed; WARN allows the trade but flags the daily-loss band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Allow,
    Warn { reason: String },
    Block { reason: String },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Block { .. })
    }
}

/// Why the ledger wants a position (or everything) closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseCause {
    /// Per-trade loss limit breached.
    TradeLossLimit,
    /// Aggregate daily loss breached the panic threshold.
    PanicLoss,
}

/// Directive from the post-fill risk check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDirective {
    Allow,
    CloseAll { cause: CloseCause },
}

/// Snapshot of the ledger for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub open_positions: usize,
    pub aggregate_exposure: Decimal,
    pub daily_pnl: Decimal,
    pub max_drawdown_today: Decimal,
    pub limits: RiskLimits,
}

#[derive(Debug, Default)]
struct DayState {
    daily_pnl: Decimal,
    peak_pnl: Decimal,
    max_drawdown: Decimal,
    /// Ids already folded into `daily_pnl`; makes removal idempotent.
    closed: HashSet<Uuid>,
}

/// Tracks open positions, aggregate exposure, and daily P&L, and gates every
/// new position against the configured limits.
pub struct RiskLedger {
    positions: DashMap<Uuid, HedgedPosition>,
    limits: RwLock<RiskLimits>,
    day: RwLock<DayState>,
    lot_size: u32,
}

impl RiskLedger {
    pub fn new(limits: RiskLimits, lot_size: u32) -> Self {
        Self {
            positions: DashMap::new(),
            limits: RwLock::new(limits),
            day: RwLock::new(DayState::default()),
            lot_size,
        }
    }

    /// Admission pre-check for a new hedged position. Rules run in order and
    /// the first failure blocks; nothing is mutated here. Recording happens
    /// separately once the broker confirms placement.
    pub async fn admit_new(
        &self,
        signal_type: SignalType,
        main_qty: u32,
        main_price: Decimal,
        hedge_qty: u32,
        hedge_price: Decimal,
    ) -> Admission {
        let limits = self.limits.read().await;

        let open = self.open_count();
        if open >= limits.max_open_positions {
            return Admission::Block {
                reason: format!(
                    "open positions {} at limit {}",
                    open, limits.max_open_positions
                ),
            };
        }

        if main_qty > limits.max_position_size {
            return Admission::Block {
                reason: format!(
                    "position size {} lots exceeds limit {}",
                    main_qty, limits.max_position_size
                ),
            };
        }

        let units = Decimal::from(self.lot_size);
        let net_exposure = (main_price * Decimal::from(main_qty)
            - hedge_price * Decimal::from(hedge_qty))
            * units;
        let aggregate = self.aggregate_exposure();
        if aggregate + net_exposure > limits.max_exposure {
            return Admission::Block {
                reason: format!(
                    "exposure {} + {} would exceed limit {}",
                    aggregate, net_exposure, limits.max_exposure
                ),
            };
        }

        let day = self.day.read().await;
        if day.daily_pnl <= -limits.max_daily_loss {
            return Admission::Block {
                reason: format!(
                    "daily P&L {} at or beyond loss limit {}",
                    day.daily_pnl, limits.max_daily_loss
                ),
            };
        }

        let warn_band = limits.max_daily_loss * Decimal::new(8, 1);
        if day.daily_pnl <= -warn_band {
            let reason = format!(
                "daily P&L {} within 80% of loss limit {}",
                day.daily_pnl, limits.max_daily_loss
            );
            warn!(?signal_type, %net_exposure, "{}", reason);
            return Admission::Warn { reason };
        }

        debug!(
            ?signal_type,
            open,
            %net_exposure,
            %aggregate,
            "Admission allowed"
        );
        Admission::Allow
    }

    /// Record a position after the broker confirms placement.
    pub fn record(&self, position: HedgedPosition) -> Result<()> {
        if !position.is_open() {
            return Err(Error::Position(format!(
                "cannot record position {} in state {:?}",
                position.id, position.status
            )));
        }
        if self.positions.contains_key(&position.id) {
            return Err(Error::Position(format!(
                "position {} already recorded",
                position.id
            )));
        }

        info!(
            position_id = %position.id,
            signal = ?position.signal_type,
            net_exposure = %position.net_exposure,
            lots = position.lots(),
            "Recording position"
        );
        self.positions.insert(position.id, position);
        Ok(())
    }

    /// Post-fill risk check for one position's live P&L.
    pub async fn update_position_risk(&self, id: Uuid, current_pnl: Decimal) -> RiskDirective {
        let limits = self.limits.read().await;

        if current_pnl <= -limits.max_loss_per_trade {
            warn!(
                position_id = %id,
                pnl = %current_pnl,
                limit = %limits.max_loss_per_trade,
                "Per-trade loss limit breached"
            );
            return RiskDirective::CloseAll {
                cause: CloseCause::TradeLossLimit,
            };
        }

        let day = self.day.read().await;
        if day.daily_pnl <= -limits.panic_loss_threshold {
            warn!(
                daily_pnl = %day.daily_pnl,
                threshold = %limits.panic_loss_threshold,
                "Panic loss threshold breached"
            );
            return RiskDirective::CloseAll {
                cause: CloseCause::PanicLoss,
            };
        }

        RiskDirective::Allow
    }

    /// Remove a position and fold its final P&L into the day's totals.
    /// Idempotent per id: a second removal never double-counts.
    pub async fn remove_position(&self, id: Uuid, final_pnl: Decimal) -> Option<HedgedPosition> {
        let mut day = self.day.write().await;
        if day.closed.contains(&id) {
            debug!(position_id = %id, "Position already removed, ignoring");
            return None;
        }

        let Some((_, mut position)) = self.positions.remove(&id) else {
            warn!(position_id = %id, "Remove requested for unknown position");
            return None;
        };

        day.closed.insert(id);
        day.daily_pnl += final_pnl;
        if day.daily_pnl > day.peak_pnl {
            day.peak_pnl = day.daily_pnl;
        }
        let drawdown = day.peak_pnl - day.daily_pnl;
        if drawdown > day.max_drawdown {
            day.max_drawdown = drawdown;
        }

        if let Err(e) = position.close(final_pnl) {
            warn!(position_id = %id, error = %e, "Position close transition failed");
        }
        info!(
            position_id = %id,
            final_pnl = %final_pnl,
            daily_pnl = %day.daily_pnl,
            "Position removed"
        );
        Some(position)
    }

    /// Sum of net exposure across open positions.
    pub fn aggregate_exposure(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|e| e.value().is_open())
            .map(|e| e.value().net_exposure)
            .sum()
    }

    pub fn open_count(&self) -> usize {
        self.positions.iter().filter(|e| e.value().is_open()).count()
    }

    pub fn open_positions(&self) -> Vec<HedgedPosition> {
        self.positions
            .iter()
            .filter(|e| e.value().is_open())
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<HedgedPosition> {
        self.positions.get(&id).map(|p| p.clone())
    }

    /// Record a price observation and return the position's unrealized P&L.
    pub fn mark_price(
        &self,
        id: Uuid,
        main_price: Decimal,
        hedge_price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Option<Decimal> {
        self.positions
            .get_mut(&id)
            .map(|mut p| p.mark_price(main_price, hedge_price, at))
    }

    pub fn set_stop_state(&self, id: Uuid, state: StopLossState) -> bool {
        if let Some(mut p) = self.positions.get_mut(&id) {
            p.stop_state = state;
            true
        } else {
            false
        }
    }

    pub async fn status(&self) -> RiskStatus {
        let day = self.day.read().await;
        RiskStatus {
            open_positions: self.open_count(),
            aggregate_exposure: self.aggregate_exposure(),
            daily_pnl: day.daily_pnl,
            max_drawdown_today: day.max_drawdown,
            limits: self.limits.read().await.clone(),
        }
    }

    /// Replace the limits; read by every subsequent admission check.
    pub async fn update_limits(&self, limits: RiskLimits) {
        let mut current = self.limits.write().await;
        *current = limits;
        info!("Risk limits updated");
    }

    pub async fn limits(&self) -> RiskLimits {
        self.limits.read().await.clone()
    }

    /// Reset daily counters (call at start of trading day).
    pub async fn reset_daily(&self) {
        let mut day = self.day.write().await;
        *day = DayState::default();
        info!("Risk ledger daily reset");
    }
}
