//! Paper-trading collaborators.
//!
//! Deterministic in-process implementations of the broker and market-data
//! interfaces, used by the daemon's paper mode and by tests.

use async_trait::async_trait;
use dashmap::DashMap;
use options_core::traits::{BrokerClient, MarketData};
use options_core::types::{
    BrokerOrder, BrokerPosition, OptionContract, OrderSide, OrderSpec,
};
use options_core::{Error, Result};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Settable option-chain prices keyed by instrument id.
#[derive(Default)]
pub struct SimMarketData {
    prices: DashMap<String, Decimal>,
}

impl SimMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, instrument: &str, price: Decimal) {
        self.prices.insert(instrument.to_string(), price);
    }

    pub fn quote(&self, instrument: &str) -> Option<Decimal> {
        self.prices.get(instrument).map(|p| *p)
    }
}

#[async_trait]
impl MarketData for SimMarketData {
    async fn option_price(&self, contract: &OptionContract) -> Result<Decimal> {
        let instrument = contract.instrument_id();
        self.quote(&instrument)
            .ok_or_else(|| Error::MarketData(format!("no quote for {instrument}")))
    }
}

#[derive(Debug, Clone)]
struct PaperPosition {
    net_quantity: i64,
    avg_price: Decimal,
}

/// Broker simulator: orders fill immediately at the live quote (or the limit
/// price when no quote exists) and positions net up accordingly.
pub struct PaperBroker {
    market: Arc<SimMarketData>,
    orders: DashMap<String, BrokerOrder>,
    positions: DashMap<String, PaperPosition>,
    seq: AtomicU64,
}

impl PaperBroker {
    pub fn new(market: Arc<SimMarketData>) -> Self {
        Self {
            market,
            orders: DashMap::new(),
            positions: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Rewrite the reported status of an order (test hook for divergence
    /// scenarios).
    pub fn set_order_status(&self, order_id: &str, status: &str) {
        if let Some(mut order) = self.orders.get_mut(order_id) {
            order.status = status.to_string();
        }
    }

    /// Drop an order from the broker's report (test hook).
    pub fn remove_order(&self, order_id: &str) {
        self.orders.remove(order_id);
    }

    /// Add an order the engine never placed (test hook for the import path).
    pub fn inject_order(&self, order: BrokerOrder) {
        self.orders.insert(order.order_id.clone(), order);
    }

    /// Drop a reported position (test hook).
    pub fn remove_position(&self, instrument: &str) {
        self.positions.remove(instrument);
    }

    fn apply_fill(&self, spec: &OrderSpec, fill_price: Decimal) {
        let delta = match spec.side {
            OrderSide::Buy => spec.quantity as i64,
            OrderSide::Sell => -(spec.quantity as i64),
        };
        let mut entry = self
            .positions
            .entry(spec.instrument.clone())
            .or_insert(PaperPosition {
                net_quantity: 0,
                avg_price: Decimal::ZERO,
            });
        entry.net_quantity += delta;
        entry.avg_price = fill_price;
        if entry.net_quantity == 0 {
            drop(entry);
            self.positions.remove(&spec.instrument);
        }
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn place_order(&self, spec: &OrderSpec) -> Result<String> {
        let order_id = format!("PB-{:06}", self.seq.fetch_add(1, Ordering::SeqCst) + 1);
        let fill_price = self.market.quote(&spec.instrument).unwrap_or(spec.price);

        self.orders.insert(
            order_id.clone(),
            BrokerOrder {
                order_id: order_id.clone(),
                instrument: spec.instrument.clone(),
                side: spec.side,
                quantity: spec.quantity,
                status: "COMPLETE".to_string(),
                price: spec.price,
                executed_price: Some(fill_price),
            },
        );
        self.apply_fill(spec, fill_price);

        info!(
            %order_id,
            instrument = %spec.instrument,
            side = ?spec.side,
            quantity = spec.quantity,
            fill_price = %fill_price,
            "[PAPER] Order filled"
        );
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        match self.orders.get_mut(order_id) {
            Some(mut order) => {
                order.status = "CANCELLED".to_string();
                info!(order_id, "[PAPER] Order cancelled");
                Ok(())
            }
            None => {
                warn!(order_id, "[PAPER] Cancel for unknown order");
                Err(Error::Order {
                    message: format!("unknown order {order_id}"),
                })
            }
        }
    }

    async fn get_orders(&self) -> Result<Vec<BrokerOrder>> {
        Ok(self.orders.iter().map(|e| e.value().clone()).collect())
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(self
            .positions
            .iter()
            .map(|e| BrokerPosition {
                instrument: e.key().clone(),
                net_quantity: e.value().net_quantity,
                avg_price: e.value().avg_price,
            })
            .collect())
    }

    async fn get_quote(&self, instrument: &str) -> Result<Decimal> {
        self.market
            .quote(instrument)
            .ok_or_else(|| Error::MarketData(format!("no quote for {instrument}")))
    }
}
