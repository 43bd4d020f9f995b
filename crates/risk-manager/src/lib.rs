//! Risk Manager
//!
//! Admission control against exposure and loss limits, progressive stop-loss
//! state machines, and the slippage/latency circuit breaker.

pub mod ledger;
pub mod progressive_stops;
pub mod slippage_gate;

pub use ledger::{Admission, CloseCause, RiskDirective, RiskLedger, RiskStatus};
pub use progressive_stops::{ProgressiveStopEngine, StopConfig, StopEvaluation};
pub use slippage_gate::{
    GateConfig, GateStats, PauseReason, SlippageDecision, SlippageLatencyGate,
};
