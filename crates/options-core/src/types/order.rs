//! Broker-facing order types and status mapping.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Side of an order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The closing side for a leg opened on this side.
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Internal lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created internally but not yet acknowledged by the broker.
    Pending,
    /// Acknowledged and working at the broker.
    Placed,
    /// Filled.
    Executed,
    /// Rejected by the broker.
    Rejected,
    /// Cancelled (by us or the broker).
    Cancelled,
    /// Terminal internal failure (exhausted retries, unknown rejection).
    Failed,
}

impl OrderStatus {
    /// Statuses that imply the order should be visible at the broker.
    pub fn expects_broker_presence(&self) -> bool {
        matches!(self, OrderStatus::Placed | OrderStatus::Executed)
    }

    /// Statuses that end the order's lifecycle. Orders are never deleted,
    /// only marked terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected | OrderStatus::Cancelled | OrderStatus::Failed
        )
    }

    /// Map the broker's status vocabulary onto the internal enum. Returns
    /// `None` for unknown vocabulary so the caller takes the conservative
    /// branch instead of guessing.
    pub fn from_broker(raw: &str) -> Option<OrderStatus> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "OPEN" | "TRIGGER PENDING" | "VALIDATION PENDING"
            | "PUT ORDER REQ RECEIVED" => Some(OrderStatus::Placed),
            "COMPLETE" | "FILLED" | "EXECUTED" | "TRADED" => Some(OrderStatus::Executed),
            "REJECTED" => Some(OrderStatus::Rejected),
            "CANCELLED" | "CANCELED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Snake-case form used for persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Placed => "placed",
            OrderStatus::Executed => "executed",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }

    /// Inverse of [`OrderStatus::as_str`].
    pub fn parse(raw: &str) -> Option<OrderStatus> {
        match raw {
            "pending" => Some(OrderStatus::Pending),
            "placed" => Some(OrderStatus::Placed),
            "executed" => Some(OrderStatus::Executed),
            "rejected" => Some(OrderStatus::Rejected),
            "cancelled" => Some(OrderStatus::Cancelled),
            "failed" => Some(OrderStatus::Failed),
            _ => None,
        }
    }
}

/// Parameters for a new broker order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Canonical instrument key (see `OptionContract::instrument_id`).
    pub instrument: String,
    pub side: OrderSide,
    /// Quantity in lots.
    pub quantity: u32,
    /// Limit price.
    pub price: Decimal,
    pub linked_position_id: Option<Uuid>,
}

/// Internal record of an order submitted to (or imported from) the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Broker-assigned order id.
    pub order_id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: u32,
    /// Price the order was submitted at.
    pub price: Decimal,
    /// Average execution price once filled.
    pub executed_price: Option<Decimal>,
    pub status: OrderStatus,
    pub linked_position_id: Option<Uuid>,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Resubmission attempts made for this order chain.
    pub retry_count: u32,
}

impl OrderRecord {
    pub fn new(order_id: impl Into<String>, spec: &OrderSpec, status: OrderStatus) -> Self {
        let now = Utc::now();
        Self {
            order_id: order_id.into(),
            instrument: spec.instrument.clone(),
            side: spec.side,
            quantity: spec.quantity,
            price: spec.price,
            executed_price: None,
            status,
            linked_position_id: spec.linked_position_id,
            placed_at: now,
            updated_at: now,
            retry_count: 0,
        }
    }

    /// Rebuild the submission parameters for a resubmission at a new price.
    pub fn respec(&self, price: Decimal) -> OrderSpec {
        OrderSpec {
            instrument: self.instrument.clone(),
            side: self.side,
            quantity: self.quantity,
            price,
            linked_position_id: self.linked_position_id,
        }
    }
}

/// An order as reported by the broker, in its own status vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub order_id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: u32,
    /// Raw broker status string.
    pub status: String,
    pub price: Decimal,
    pub executed_price: Option<Decimal>,
}

/// A net position as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub instrument: String,
    /// Signed net quantity in lots (negative = net short).
    pub net_quantity: i64,
    pub avg_price: Decimal,
}

/// Broker rejection category, classified once at the broker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionClass {
    /// Margin/funds shortfall. Terminal, never retried.
    Margin,
    /// Price or circuit-limit problem. Retried with a fresh quote.
    Price,
    /// Outside market hours. Queued for the next session.
    MarketClosed,
    /// Unclassified. Terminal plus an alert.
    Unknown,
}

impl RejectionClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RejectionClass::Price)
    }

    /// Best-effort keyword classification of broker rejection text.
    pub fn classify(reason: &str) -> RejectionClass {
        let r = reason.to_ascii_lowercase();
        if r.contains("margin") || r.contains("insufficient fund") || r.contains("rms") {
            RejectionClass::Margin
        } else if r.contains("price") || r.contains("circuit") || r.contains("ltp") {
            RejectionClass::Price
        } else if r.contains("market closed")
            || r.contains("market is closed")
            || r.contains("outside market hours")
            || r.contains("session")
        {
            RejectionClass::MarketClosed
        } else {
            RejectionClass::Unknown
        }
    }
}
