//! Order reconciliation against the broker.
//!
//! Periodically diffs the internal order ledger against the broker's
//! reported orders and positions, classifies every divergence, writes safe
//! corrections through immediately, and escalates anything that needs a
//! human. An assumed-filled order the broker reports rejected is never
//! auto-synced.

use chrono::{DateTime, Utc};
use options_core::traits::{AlertLevel, BrokerClient, Notifier, OrderStore};
use options_core::types::{
    BrokerOrder, Discrepancy, DiscrepancyKind, OrderRecord, OrderStatus, ReconcileAction,
};
use options_core::{Error, Result};
use risk_manager::RiskLedger;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    pub interval_secs: u64,
    /// Executed-price divergence tolerated before a PRICE_MISMATCH.
    pub price_tolerance: Decimal,
    /// Discrepancies retained for audit.
    pub ring_capacity: usize,
    pub broker_timeout_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            price_tolerance: Decimal::new(5, 2), // 0.05
            ring_capacity: 256,
            broker_timeout_ms: 5000,
        }
    }
}

/// Counters for the status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationStats {
    pub passes: u64,
    pub discrepancies_found: u64,
    pub synced: u64,
    pub alerts_raised: u64,
    pub orders_imported: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
}

/// Background loop that keeps the internal order ledger consistent with the
/// broker's authoritative state.
pub struct OrderReconciler {
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    ledger: Arc<RiskLedger>,
    config: ReconcilerConfig,
    recent: RwLock<VecDeque<Discrepancy>>,
    stats: RwLock<ReconciliationStats>,
}

impl OrderReconciler {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        ledger: Arc<RiskLedger>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            broker,
            store,
            notifier,
            ledger,
            config,
            recent: RwLock::new(VecDeque::new()),
            stats: RwLock::new(ReconciliationStats::default()),
        }
    }

    /// Run until the shutdown signal flips. A pass in flight always finishes
    /// before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        info!(
            interval_secs = self.config.interval_secs,
            "Order reconciler started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        warn!(error = %e, "Reconciliation pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Order reconciler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One reconciliation pass. Returns the discrepancies it found.
    pub async fn reconcile_once(&self) -> Result<Vec<Discrepancy>> {
        let internal = self.store.active_orders().await?;
        let broker_orders = self.timed(self.broker.get_orders()).await?;
        let broker_by_id: HashMap<&str, &BrokerOrder> = broker_orders
            .iter()
            .map(|o| (o.order_id.as_str(), o))
            .collect();

        let mut found: Vec<Discrepancy> = Vec::new();
        let mut synced = 0u64;
        let mut alerts = 0u64;
        let mut imported = 0u64;

        for record in &internal {
            match broker_by_id.get(record.order_id.as_str()) {
                None => {
                    if record.status.expects_broker_presence() {
                        // A missing order that should exist is never
                        // silently repaired.
                        let d = Discrepancy::new(
                            record.order_id.clone(),
                            DiscrepancyKind::MissingAtBroker,
                            Some(record.status),
                            None,
                            ReconcileAction::Alert,
                        );
                        self.notifier
                            .send_alert(
                                AlertLevel::Critical,
                                "Order missing at broker",
                                &format!(
                                    "Order {} ({:?}) is not in the broker's order list",
                                    record.order_id, record.status
                                ),
                                None,
                            )
                            .await;
                        alerts += 1;
                        found.push(d);
                    }
                }
                Some(broker_order) => match OrderStatus::from_broker(&broker_order.status) {
                    None => {
                        let d = Discrepancy::new(
                            record.order_id.clone(),
                            DiscrepancyKind::StatusMismatch,
                            Some(record.status),
                            None,
                            ReconcileAction::Alert,
                        );
                        self.notifier
                            .send_alert(
                                AlertLevel::Warning,
                                "Unknown broker order status",
                                &format!(
                                    "Order {} reports unmapped status '{}'",
                                    record.order_id, broker_order.status
                                ),
                                None,
                            )
                            .await;
                        alerts += 1;
                        found.push(d);
                    }
                    Some(broker_status) if broker_status != record.status => {
                        if record.status == OrderStatus::Executed
                            && broker_status == OrderStatus::Rejected
                        {
                            // An order we assumed filled was actually
                            // rejected. Left untouched pending human
                            // resolution.
                            let d = Discrepancy::new(
                                record.order_id.clone(),
                                DiscrepancyKind::StatusMismatch,
                                Some(record.status),
                                Some(broker_status),
                                ReconcileAction::Alert,
                            );
                            self.notifier
                                .send_alert(
                                    AlertLevel::Critical,
                                    "Executed order rejected at broker",
                                    &format!(
                                        "Order {} is EXECUTED internally but REJECTED at the broker",
                                        record.order_id
                                    ),
                                    None,
                                )
                                .await;
                            alerts += 1;
                            found.push(d);
                        } else {
                            self.store
                                .update_status(
                                    &record.order_id,
                                    broker_status,
                                    broker_order.executed_price,
                                )
                                .await?;
                            debug!(
                                order_id = %record.order_id,
                                from = ?record.status,
                                to = ?broker_status,
                                "Synced order status from broker"
                            );
                            synced += 1;
                            found.push(Discrepancy::new(
                                record.order_id.clone(),
                                DiscrepancyKind::StatusMismatch,
                                Some(record.status),
                                Some(broker_status),
                                ReconcileAction::Sync,
                            ));
                        }
                    }
                    Some(_) if record.status == OrderStatus::Executed => {
                        if let Some(broker_price) = broker_order.executed_price {
                            match record.executed_price {
                                Some(internal_price)
                                    if (internal_price - broker_price).abs()
                                        > self.config.price_tolerance =>
                                {
                                    self.store
                                        .update_status(
                                            &record.order_id,
                                            OrderStatus::Executed,
                                            Some(broker_price),
                                        )
                                        .await?;
                                    warn!(
                                        order_id = %record.order_id,
                                        internal = %internal_price,
                                        broker = %broker_price,
                                        "Execution price mismatch, synced from broker"
                                    );
                                    synced += 1;
                                    found.push(Discrepancy::new(
                                        record.order_id.clone(),
                                        DiscrepancyKind::PriceMismatch,
                                        Some(record.status),
                                        Some(OrderStatus::Executed),
                                        ReconcileAction::Sync,
                                    ));
                                }
                                None => {
                                    // Fill price was never captured; complete
                                    // it quietly.
                                    self.store
                                        .update_status(
                                            &record.order_id,
                                            OrderStatus::Executed,
                                            Some(broker_price),
                                        )
                                        .await?;
                                }
                                _ => {}
                            }
                        }
                    }
                    Some(_) => {}
                },
            }
        }

        // Broker orders nobody placed through the tracked path. These close
        // the window between admission and the post-fill record.
        let internal_ids: HashSet<&str> = internal.iter().map(|r| r.order_id.as_str()).collect();
        for broker_order in &broker_orders {
            if internal_ids.contains(broker_order.order_id.as_str()) {
                continue;
            }
            if self.store.get_order(&broker_order.order_id).await?.is_some() {
                continue;
            }

            let status =
                OrderStatus::from_broker(&broker_order.status).unwrap_or(OrderStatus::Placed);
            let now = Utc::now();
            let record = OrderRecord {
                order_id: broker_order.order_id.clone(),
                instrument: broker_order.instrument.clone(),
                side: broker_order.side,
                quantity: broker_order.quantity,
                price: broker_order.price,
                executed_price: broker_order.executed_price,
                status,
                linked_position_id: None,
                placed_at: now,
                updated_at: now,
                retry_count: 0,
            };
            self.store.import_broker_order(record).await?;
            self.notifier
                .send_alert(
                    AlertLevel::Warning,
                    "Untracked broker order imported",
                    &format!(
                        "Order {} on {} exists at the broker but was not placed through the engine",
                        broker_order.order_id, broker_order.instrument
                    ),
                    None,
                )
                .await;
            imported += 1;
            alerts += 1;
            found.push(Discrepancy::new(
                broker_order.order_id.clone(),
                DiscrepancyKind::UnknownInternal,
                None,
                Some(status),
                ReconcileAction::Sync,
            ));
        }

        // Every open position should be visible at the broker. Missing ones
        // are flagged, never auto-fixed.
        match self.timed(self.broker.get_positions()).await {
            Ok(broker_positions) => {
                let held: HashSet<String> = broker_positions
                    .iter()
                    .filter(|p| p.net_quantity != 0)
                    .map(|p| p.instrument.clone())
                    .collect();
                for position in self.ledger.open_positions() {
                    let instrument = position.main_leg.contract.instrument_id();
                    if !held.contains(&instrument) {
                        warn!(
                            position_id = %position.id,
                            %instrument,
                            "Open position has no broker-side counterpart"
                        );
                        self.notifier
                            .send_alert(
                                AlertLevel::Warning,
                                "Position missing at broker",
                                &format!(
                                    "Open position {} ({}) is not reported by the broker",
                                    position.id, instrument
                                ),
                                None,
                            )
                            .await;
                        alerts += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Skipping position presence check"),
        }

        self.record_pass(&found, synced, alerts, imported);

        if !found.is_empty() {
            info!(
                discrepancies = found.len(),
                synced, alerts, imported, "Reconciliation pass found divergence"
            );
        }
        Ok(found)
    }

    pub fn stats(&self) -> ReconciliationStats {
        self.stats.read().unwrap().clone()
    }

    /// Most recent discrepancies, newest last.
    pub fn recent_discrepancies(&self) -> Vec<Discrepancy> {
        self.recent.read().unwrap().iter().cloned().collect()
    }

    fn record_pass(&self, found: &[Discrepancy], synced: u64, alerts: u64, imported: u64) {
        {
            let mut recent = self.recent.write().unwrap();
            for d in found {
                recent.push_back(d.clone());
                if recent.len() > self.config.ring_capacity {
                    recent.pop_front();
                }
            }
        }
        let mut stats = self.stats.write().unwrap();
        stats.passes += 1;
        stats.discrepancies_found += found.len() as u64;
        stats.synced += synced;
        stats.alerts_raised += alerts;
        stats.orders_imported += imported;
        stats.last_pass_at = Some(Utc::now());
    }

    async fn timed<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(Duration::from_millis(self.config.broker_timeout_ms), fut).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::BrokerTimeout {
                timeout_ms: self.config.broker_timeout_ms,
            }),
        }
    }
}
