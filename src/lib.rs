//! Hedge-Bot: hedged options execution, risk, and reconciliation engine
//!
//! This is the root crate that provides benchmark access to the internal
//! modules. For actual functionality, use the individual crates directly:
//!
//! - `options-core`: shared types, configuration, collaborator interfaces
//! - `risk-manager`: admission control, progressive stops, circuit breaker
//! - `trading-engine`: hedge selection, execution, monitoring, reconciliation
//! - `engine-daemon`: paper-mode runtime wiring

// Re-export for benchmarks
pub use options_core as core;
pub use risk_manager as risk;
pub use trading_engine as trading;
