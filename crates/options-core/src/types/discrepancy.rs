//! Discrepancy records produced by order reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::order::OrderStatus;

/// What kind of divergence was detected between the internal ledger and the
/// broker's reported state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Internal order that should exist at the broker but does not.
    MissingAtBroker,
    /// Matched order whose statuses disagree.
    StatusMismatch,
    /// Matched executed order whose fill prices disagree beyond tolerance.
    PriceMismatch,
    /// Broker order with no internal counterpart.
    UnknownInternal,
}

/// Corrective action taken for a discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Internal state overwritten from the broker; auto-resolved.
    Sync,
    /// Order resubmitted.
    Retry,
    /// Escalated through the notifier; never auto-resolved.
    Alert,
}

/// Resolution state of a discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    AutoResolved,
    Escalated,
    Pending,
}

/// One detected mismatch, retained in a bounded ring buffer for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub order_id: String,
    pub kind: DiscrepancyKind,
    pub internal_status: Option<OrderStatus>,
    /// Mapped broker status; `None` when the broker vocabulary was unknown.
    pub broker_status: Option<OrderStatus>,
    pub detected_at: DateTime<Utc>,
    pub action_taken: ReconcileAction,
    pub resolution: Resolution,
}

impl Discrepancy {
    pub fn new(
        order_id: impl Into<String>,
        kind: DiscrepancyKind,
        internal_status: Option<OrderStatus>,
        broker_status: Option<OrderStatus>,
        action_taken: ReconcileAction,
    ) -> Self {
        let resolution = match action_taken {
            ReconcileAction::Sync => Resolution::AutoResolved,
            ReconcileAction::Alert => Resolution::Escalated,
            ReconcileAction::Retry => Resolution::Pending,
        };
        Self {
            order_id: order_id.into(),
            kind,
            internal_status,
            broker_status,
            detected_at: Utc::now(),
            action_taken,
            resolution,
        }
    }
}
