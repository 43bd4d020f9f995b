//! Position monitoring loop.
//!
//! Polls live premiums for open positions, keeps their P&L samples fresh,
//! drives the progressive stop engine and the ledger's risk check, and
//! emits exit commands exactly once per trigger.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use options_core::traits::MarketData;
use options_core::types::OptionContract;
use options_core::{Error, Result};
use risk_manager::{CloseCause, ProgressiveStopEngine, RiskDirective, RiskLedger};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Monitor timing. The poll interval is clamped to [10s, 300s]; positions
/// checked within the last `min_check_gap_secs` are skipped to bound broker
/// API call volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub min_check_gap_secs: i64,
    pub quote_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 20,
            min_check_gap_secs: 10,
            quote_timeout_ms: 1500,
        }
    }
}

/// Why a position is being exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ProgressiveSl,
    TradeLossLimit,
    PanicLoss,
    Manual,
}

/// Command emitted when a position must be closed.
#[derive(Debug, Clone)]
pub struct ExitCommand {
    pub position_id: Uuid,
    pub reason: ExitReason,
    pub unrealized_pnl: Decimal,
    pub triggered_at: DateTime<Utc>,
}

/// Background loop polling open positions for stop-loss and risk exits.
pub struct PositionMonitor {
    ledger: Arc<RiskLedger>,
    market_data: Arc<dyn MarketData>,
    stops: ProgressiveStopEngine,
    config: MonitorConfig,
    last_checked: DashMap<Uuid, DateTime<Utc>>,
    /// Positions already flagged for exit; skipped until the exit completes
    /// or fails.
    pending_exits: DashMap<Uuid, ExitReason>,
    exit_tx: mpsc::Sender<ExitCommand>,
    exit_rx: Option<mpsc::Receiver<ExitCommand>>,
}

impl PositionMonitor {
    pub fn new(
        ledger: Arc<RiskLedger>,
        market_data: Arc<dyn MarketData>,
        stops: ProgressiveStopEngine,
        mut config: MonitorConfig,
    ) -> Self {
        config.poll_interval_secs = config.poll_interval_secs.clamp(10, 300);
        let (exit_tx, exit_rx) = mpsc::channel(256);
        Self {
            ledger,
            market_data,
            stops,
            config,
            last_checked: DashMap::new(),
            pending_exits: DashMap::new(),
            exit_tx,
            exit_rx: Some(exit_rx),
        }
    }

    /// Take the exit-command receiver (can only be called once).
    pub fn take_exit_receiver(&mut self) -> Option<mpsc::Receiver<ExitCommand>> {
        self.exit_rx.take()
    }

    /// Run until the shutdown signal flips; the tick in flight finishes
    /// first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        info!(
            interval_secs = self.config.poll_interval_secs,
            "Position monitor started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Position monitor stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One monitoring tick over all open positions. Returns the number of
    /// exit commands emitted.
    pub async fn poll_once(&self) -> usize {
        let now = Utc::now();
        let today = now.date_naive();
        let mut emitted = 0;

        for position in self.ledger.open_positions() {
            if self.pending_exits.contains_key(&position.id) {
                continue;
            }
            if let Some(last) = self.last_checked.get(&position.id) {
                if now.signed_duration_since(*last).num_seconds() < self.config.min_check_gap_secs
                {
                    continue;
                }
            }

            let main_price = match self.quote(&position.main_leg.contract).await {
                Ok(price) => price,
                Err(e) => {
                    // Quote failures are retryable; skip this tick only
                    debug!(position_id = %position.id, error = %e, "Main leg quote failed");
                    continue;
                }
            };
            let hedge_price = match &position.hedge_leg {
                Some(leg) => match self.quote(&leg.contract).await {
                    Ok(price) => Some(price),
                    Err(e) => {
                        debug!(position_id = %position.id, error = %e, "Hedge leg quote failed");
                        continue;
                    }
                },
                None => None,
            };

            self.last_checked.insert(position.id, now);
            let Some(pnl) = self.ledger.mark_price(position.id, main_price, hedge_price, now)
            else {
                continue;
            };

            let eval = self.stops.evaluate(&position, pnl, today);
            self.ledger.set_stop_state(position.id, eval.state);

            let directive = self.ledger.update_position_risk(position.id, pnl).await;
            let reason = match directive {
                RiskDirective::CloseAll {
                    cause: CloseCause::PanicLoss,
                } => Some(ExitReason::PanicLoss),
                RiskDirective::CloseAll {
                    cause: CloseCause::TradeLossLimit,
                } => Some(ExitReason::TradeLossLimit),
                RiskDirective::Allow if eval.should_exit => Some(ExitReason::ProgressiveSl),
                RiskDirective::Allow => None,
            };

            if let Some(reason) = reason {
                if self.emit_exit(position.id, reason, pnl, now).await {
                    emitted += 1;
                }
            }
        }

        emitted
    }

    /// Flag a position for exit and send the command once. Returns false if
    /// it was already pending or nobody is listening.
    async fn emit_exit(
        &self,
        position_id: Uuid,
        reason: ExitReason,
        unrealized_pnl: Decimal,
        triggered_at: DateTime<Utc>,
    ) -> bool {
        if self.pending_exits.insert(position_id, reason).is_some() {
            return false;
        }
        info!(
            position_id = %position_id,
            ?reason,
            pnl = %unrealized_pnl,
            "Exit triggered"
        );

        let command = ExitCommand {
            position_id,
            reason,
            unrealized_pnl,
            triggered_at,
        };
        if self.exit_tx.send(command).await.is_err() {
            warn!(position_id = %position_id, "No receiver for exit command");
            self.pending_exits.remove(&position_id);
            return false;
        }
        true
    }

    /// Clear the pending flag once an exit completes or fails, so later
    /// ticks can re-arm.
    pub fn clear_pending(&self, position_id: Uuid) {
        self.pending_exits.remove(&position_id);
    }

    pub fn pending_exit(&self, position_id: Uuid) -> Option<ExitReason> {
        self.pending_exits.get(&position_id).map(|r| *r)
    }

    async fn quote(&self, contract: &OptionContract) -> Result<Decimal> {
        let timeout = Duration::from_millis(self.config.quote_timeout_ms);
        match tokio::time::timeout(timeout, self.market_data.option_price(contract)).await {
            Ok(result) => result,
            Err(_) => Err(Error::BrokerTimeout {
                timeout_ms: self.config.quote_timeout_ms,
            }),
        }
    }
}
