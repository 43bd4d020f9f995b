//! Collaborator interfaces consumed by the engine core.
//!
//! The broker wire protocol, market-data transport, and notification
//! delivery all live behind these traits; the engine only sees the narrow
//! surface below.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{BrokerOrder, BrokerPosition, OptionContract, OrderRecord, OrderSpec, OrderStatus};
use crate::Result;

/// Severity of an operator alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Order placement and account state at the broker.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Place an order; returns the broker-assigned order id.
    async fn place_order(&self, spec: &OrderSpec) -> Result<String>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// All orders the broker currently reports for the account.
    async fn get_orders(&self) -> Result<Vec<BrokerOrder>>;

    /// Net positions the broker currently reports for the account.
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>>;

    /// Live premium for an instrument.
    async fn get_quote(&self, instrument: &str) -> Result<Decimal>;
}

/// Live option-chain pricing.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn option_price(&self, contract: &OptionContract) -> Result<Decimal>;
}

/// Operator alert delivery. Fire-and-forget: implementations log and swallow
/// transport failures so callers never abort on a notification path.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(
        &self,
        level: AlertLevel,
        title: &str,
        message: &str,
        data: Option<serde_json::Value>,
    );
}

/// Persistence for internal order records. Records are never deleted, only
/// marked terminal.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, record: &OrderRecord) -> Result<()>;

    /// Orders still part of an active lifecycle (pending, placed, executed).
    async fn active_orders(&self) -> Result<Vec<OrderRecord>>;

    /// Overwrite an order's status (and fill price when known).
    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        executed_price: Option<Decimal>,
    ) -> Result<()>;

    /// Import an order first seen at the broker (placed outside the tracked
    /// path). A no-op if the id already exists.
    async fn import_broker_order(&self, record: OrderRecord) -> Result<()>;

    async fn get_order(&self, order_id: &str) -> Result<Option<OrderRecord>>;
}
