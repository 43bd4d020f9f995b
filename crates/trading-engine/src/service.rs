//! Engine facade.
//!
//! Explicitly wires the components, owns the background loops, and exposes
//! the operation surface consumed by the webhook/API layer: open a position,
//! request an exit, check slippage, and read status.

use chrono::Utc;
use options_core::traits::{AlertLevel, BrokerClient, MarketData, Notifier, OrderStore};
use options_core::types::{
    EntrySignal, HedgedPosition, OptionContract, OptionLeg, OrderSide, OrderSpec, RiskLimits,
};
use options_core::{Error, Result};
use risk_manager::{
    Admission, GateConfig, GateStats, ProgressiveStopEngine, RiskLedger, RiskStatus,
    SlippageDecision, SlippageLatencyGate, StopConfig,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::executor::{ExecutorConfig, OrderExecutor};
use crate::hedge_selector::{HedgeConfig, HedgeQuote, HedgeSelector};
use crate::monitor::{ExitCommand, ExitReason, MonitorConfig, PositionMonitor};
use crate::reconciler::{OrderReconciler, ReconcilerConfig, ReconciliationStats};

/// All component configuration for one engine instance.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub limits: RiskLimits,
    pub stops: StopConfig,
    pub gate: GateConfig,
    pub hedge: HedgeConfig,
    pub executor: ExecutorConfig,
    pub monitor: MonitorConfig,
    pub reconciler: ReconcilerConfig,
    pub lot_size: u32,
}

impl EngineSettings {
    /// Settings from environment variables with the given lot size.
    pub fn from_env(lot_size: u32) -> Self {
        Self {
            limits: RiskLimits::from_env(),
            stops: StopConfig::from_env(),
            gate: GateConfig::from_env(),
            hedge: HedgeConfig::default(),
            executor: ExecutorConfig::default(),
            monitor: MonitorConfig::default(),
            reconciler: ReconcilerConfig::default(),
            lot_size,
        }
    }
}

/// The execution engine: admission, hedge selection, gated submission, and
/// the monitoring/reconciliation loops.
pub struct EngineService {
    broker: Arc<dyn BrokerClient>,
    notifier: Arc<dyn Notifier>,
    ledger: Arc<RiskLedger>,
    gate: Arc<SlippageLatencyGate>,
    selector: HedgeSelector,
    executor: Arc<OrderExecutor>,
    monitor: Arc<PositionMonitor>,
    reconciler: Arc<OrderReconciler>,
    lot_size: u32,
    broker_timeout_ms: u64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    exit_rx: Option<mpsc::Receiver<ExitCommand>>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineService {
    /// Construct the engine with explicit collaborators. Nothing starts
    /// running until [`EngineService::start`].
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        market_data: Arc<dyn MarketData>,
        store: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        let lot_size = if settings.lot_size == 0 { 50 } else { settings.lot_size };
        let broker_timeout_ms = settings.executor.broker_timeout_ms;

        let ledger = Arc::new(RiskLedger::new(settings.limits, lot_size));
        let gate = Arc::new(SlippageLatencyGate::new(settings.gate));
        let selector = HedgeSelector::new(market_data.clone(), settings.hedge);
        let executor = Arc::new(OrderExecutor::new(
            broker.clone(),
            store.clone(),
            notifier.clone(),
            gate.clone(),
            settings.executor,
        ));
        let mut monitor = PositionMonitor::new(
            ledger.clone(),
            market_data,
            ProgressiveStopEngine::new(settings.stops),
            settings.monitor,
        );
        let exit_rx = monitor.take_exit_receiver();
        let monitor = Arc::new(monitor);
        let reconciler = Arc::new(OrderReconciler::new(
            broker.clone(),
            store,
            notifier.clone(),
            ledger.clone(),
            settings.reconciler,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            broker,
            notifier,
            ledger,
            gate,
            selector,
            executor,
            monitor,
            reconciler,
            lot_size,
            broker_timeout_ms,
            shutdown_tx,
            shutdown_rx,
            exit_rx,
            tasks: Vec::new(),
        }
    }

    /// Spawn the monitoring loop, the reconciliation loop, and the exit
    /// consumer.
    pub fn start(&mut self) {
        let monitor = self.monitor.clone();
        let shutdown = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            monitor.run(shutdown).await;
        }));

        let reconciler = self.reconciler.clone();
        let shutdown = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            reconciler.run(shutdown).await;
        }));

        if let Some(mut exit_rx) = self.exit_rx.take() {
            let broker = self.broker.clone();
            let executor = self.executor.clone();
            let ledger = self.ledger.clone();
            let monitor = self.monitor.clone();
            let notifier = self.notifier.clone();
            let timeout_ms = self.broker_timeout_ms;
            let mut shutdown = self.shutdown_rx.clone();

            self.tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        command = exit_rx.recv() => {
                            let Some(command) = command else { break };
                            let Some(position) = ledger.get(command.position_id) else {
                                monitor.clear_pending(command.position_id);
                                continue;
                            };
                            if let Err(e) = close_position(
                                &broker,
                                &executor,
                                &ledger,
                                &monitor,
                                notifier.as_ref(),
                                timeout_ms,
                                &position,
                                command.reason,
                            )
                            .await
                            {
                                error!(
                                    position_id = %command.position_id,
                                    error = %e,
                                    "Exit failed, will retry on a later tick"
                                );
                                // Re-arm so the monitor can trigger again
                                monitor.clear_pending(command.position_id);
                                notifier
                                    .send_alert(
                                        AlertLevel::Critical,
                                        "Exit failed",
                                        &format!(
                                            "Closing position {} failed: {e}",
                                            command.position_id
                                        ),
                                        None,
                                    )
                                    .await;
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        info!("Engine started");
    }

    /// The full entry path: circuit breaker, admission pre-check, hedge
    /// selection, final admission with the hedge priced, then order
    /// placement (hedge bought before the main leg is sold) and the
    /// post-fill record.
    pub async fn open_position(&self, signal: &EntrySignal) -> Result<HedgedPosition> {
        if let Some(reason) = self.gate.should_pause() {
            warn!(?reason, "Refusing new position: trading paused");
            return Err(Error::TradingPaused {
                reason: format!("{reason:?}"),
            });
        }

        // Conservative pre-check with the hedge unpriced; the exposure
        // estimate can only shrink once the hedge premium is known.
        if let Admission::Block { reason } = self
            .ledger
            .admit_new(
                signal.signal_type,
                signal.quantity,
                signal.signal_price,
                0,
                Decimal::ZERO,
            )
            .await
        {
            info!(%reason, "Admission blocked before hedge selection");
            return Err(Error::AdmissionBlocked { reason });
        }

        let hedge = self.select_hedge(signal).await?;
        if hedge.fell_back {
            self.notifier
                .send_alert(
                    AlertLevel::Warning,
                    "Hedge search fell back",
                    &format!(
                        "No candidate matched the target premium for {} {}; using offset strike {}",
                        signal.symbol, signal.strike, hedge.strike
                    ),
                    None,
                )
                .await;
        }

        match self
            .ledger
            .admit_new(
                signal.signal_type,
                signal.quantity,
                signal.signal_price,
                signal.quantity,
                hedge.price,
            )
            .await
        {
            Admission::Block { reason } => {
                info!(%reason, "Admission blocked");
                return Err(Error::AdmissionBlocked { reason });
            }
            Admission::Warn { reason } => {
                self.notifier
                    .send_alert(AlertLevel::Warning, "Risk warning", &reason, None)
                    .await;
            }
            Admission::Allow => {}
        }

        let position_id = Uuid::new_v4();
        let main_contract = OptionContract::new(
            &signal.symbol,
            signal.strike,
            signal.option_type,
            signal.expiry,
        );
        let hedge_contract = OptionContract::new(
            &signal.symbol,
            hedge.strike,
            signal.option_type,
            signal.expiry,
        );

        // Buy the protective leg before selling the main leg
        let hedge_order = self
            .executor
            .submit(
                OrderSpec {
                    instrument: hedge_contract.instrument_id(),
                    side: OrderSide::Buy,
                    quantity: signal.quantity,
                    price: hedge.price,
                    linked_position_id: Some(position_id),
                },
                hedge.price,
                signal.received_at,
            )
            .await?;

        let main_order = match self
            .executor
            .submit(
                OrderSpec {
                    instrument: main_contract.instrument_id(),
                    side: OrderSide::Sell,
                    quantity: signal.quantity,
                    price: signal.signal_price,
                    linked_position_id: Some(position_id),
                },
                signal.signal_price,
                signal.received_at,
            )
            .await
        {
            Ok(order) => order,
            Err(e) => {
                // Unwind the hedge so we are not left long premium
                warn!(
                    position_id = %position_id,
                    error = %e,
                    "Main leg failed, unwinding hedge"
                );
                if let Err(cancel_err) = self.executor.cancel(&hedge_order.order_id).await {
                    error!(
                        order_id = %hedge_order.order_id,
                        error = %cancel_err,
                        "Hedge unwind failed"
                    );
                    self.notifier
                        .send_alert(
                            AlertLevel::Critical,
                            "Hedge unwind failed",
                            &format!(
                                "Hedge order {} could not be cancelled after main-leg failure",
                                hedge_order.order_id
                            ),
                            None,
                        )
                        .await;
                }
                return Err(e);
            }
        };

        let mut position = HedgedPosition::new(
            signal.signal_type,
            OptionLeg::new(
                main_contract,
                OrderSide::Sell,
                main_order.price,
                signal.quantity,
            ),
            Some(OptionLeg::new(
                hedge_contract,
                OrderSide::Buy,
                hedge_order.price,
                signal.quantity,
            )),
            self.lot_size,
        );
        position.id = position_id;
        position.entry_time = signal.received_at;

        self.ledger.record(position.clone())?;
        info!(
            position_id = %position.id,
            main_order = %main_order.order_id,
            hedge_order = %hedge_order.order_id,
            net_exposure = %position.net_exposure,
            "Position opened"
        );
        Ok(position)
    }

    /// Admission pre-check without side effects, for callers that stage
    /// their own order flow.
    pub async fn admit_new(
        &self,
        signal: &EntrySignal,
        hedge_qty: u32,
        hedge_price: Decimal,
    ) -> Admission {
        self.ledger
            .admit_new(
                signal.signal_type,
                signal.quantity,
                signal.signal_price,
                hedge_qty,
                hedge_price,
            )
            .await
    }

    /// Record an externally assembled position once its orders are
    /// confirmed at the broker.
    pub fn record_position(&self, position: HedgedPosition) -> Result<()> {
        self.ledger.record(position)
    }

    /// Select the hedge leg for a signal without placing anything.
    pub async fn select_hedge(&self, signal: &EntrySignal) -> Result<HedgeQuote> {
        self.selector
            .select(
                &signal.symbol,
                signal.expiry,
                signal.strike,
                signal.option_type,
                signal.signal_price,
                &signal.hedge_mode,
            )
            .await
    }

    /// Evaluate slippage for callers that gate their own flow.
    pub fn check_slippage(
        &self,
        signal_price: Decimal,
        current_price: Decimal,
        side: OrderSide,
    ) -> SlippageDecision {
        self.gate.check_slippage(signal_price, current_price, side)
    }

    /// Close a position immediately.
    pub async fn request_exit(&self, position_id: Uuid, reason: ExitReason) -> Result<Decimal> {
        let position = self
            .ledger
            .get(position_id)
            .ok_or_else(|| Error::Position(format!("unknown position {position_id}")))?;
        close_position(
            &self.broker,
            &self.executor,
            &self.ledger,
            &self.monitor,
            self.notifier.as_ref(),
            self.broker_timeout_ms,
            &position,
            reason,
        )
        .await
    }

    pub async fn risk_status(&self) -> RiskStatus {
        self.ledger.status().await
    }

    pub fn gate_stats(&self) -> GateStats {
        self.gate.stats()
    }

    pub fn reconciliation_stats(&self) -> ReconciliationStats {
        self.reconciler.stats()
    }

    pub fn ledger(&self) -> &Arc<RiskLedger> {
        &self.ledger
    }

    pub fn monitor(&self) -> &Arc<PositionMonitor> {
        &self.monitor
    }

    pub fn reconciler(&self) -> &Arc<OrderReconciler> {
        &self.reconciler
    }

    /// Signal the loops to stop and wait for the passes in flight to finish.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("Engine stopped");
    }
}

/// Close both legs at market, fold the realized P&L into the ledger, and
/// clear the monitor's pending flag.
#[allow(clippy::too_many_arguments)]
async fn close_position(
    broker: &Arc<dyn BrokerClient>,
    executor: &Arc<OrderExecutor>,
    ledger: &Arc<RiskLedger>,
    monitor: &Arc<PositionMonitor>,
    notifier: &dyn Notifier,
    timeout_ms: u64,
    position: &HedgedPosition,
    reason: ExitReason,
) -> Result<Decimal> {
    let main_instrument = position.main_leg.contract.instrument_id();
    let main_quote = quote(broker, &main_instrument, timeout_ms).await?;
    let hedge_quote = match &position.hedge_leg {
        Some(leg) => Some(quote(broker, &leg.contract.instrument_id(), timeout_ms).await?),
        None => None,
    };

    let realized = position.unrealized_pnl(main_quote, hedge_quote);

    // Buy back the short main leg first, then release the hedge
    executor
        .submit_exit(
            OrderSpec {
                instrument: main_instrument,
                side: position.main_leg.side.opposite(),
                quantity: position.main_leg.quantity,
                price: main_quote,
                linked_position_id: Some(position.id),
            },
            main_quote,
            Utc::now(),
        )
        .await?;

    if let (Some(leg), Some(price)) = (&position.hedge_leg, hedge_quote) {
        executor
            .submit_exit(
                OrderSpec {
                    instrument: leg.contract.instrument_id(),
                    side: leg.side.opposite(),
                    quantity: leg.quantity,
                    price,
                    linked_position_id: Some(position.id),
                },
                price,
                Utc::now(),
            )
            .await?;
    }

    ledger.remove_position(position.id, realized).await;
    monitor.clear_pending(position.id);

    let level = match reason {
        ExitReason::PanicLoss => AlertLevel::Critical,
        _ => AlertLevel::Info,
    };
    notifier
        .send_alert(
            level,
            "Position closed",
            &format!(
                "Position {} closed ({reason:?}), realized P&L {realized}",
                position.id
            ),
            None,
        )
        .await;

    info!(
        position_id = %position.id,
        ?reason,
        realized_pnl = %realized,
        "Position closed"
    );
    Ok(realized)
}

async fn quote(
    broker: &Arc<dyn BrokerClient>,
    instrument: &str,
    timeout_ms: u64,
) -> Result<Decimal> {
    match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        broker.get_quote(instrument),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::BrokerTimeout { timeout_ms }),
    }
}
