//! Trading Engine
//!
//! Hedge selection, gated order execution, position monitoring, and
//! continuous reconciliation against the broker.

pub mod alerts;
pub mod executor;
pub mod hedge_selector;
pub mod monitor;
pub mod paper;
pub mod reconciler;
pub mod service;

pub use alerts::{AlertPublisher, LogNotifier};
pub use executor::{ExecutorConfig, OrderExecutor, RejectionOutcome};
pub use hedge_selector::{HedgeConfig, HedgeQuote, HedgeSelector};
pub use monitor::{ExitCommand, ExitReason, MonitorConfig, PositionMonitor};
pub use paper::{PaperBroker, SimMarketData};
pub use reconciler::{OrderReconciler, ReconcilerConfig, ReconciliationStats};
pub use service::{EngineService, EngineSettings};
