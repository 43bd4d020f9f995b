//! Slippage and latency gate for the execution path.
//!
//! Decides whether an execution's price movement is acceptable, tracks
//! broker round-trip latency, and exposes the circuit breaker consulted
//! before every new order.

use chrono::{DateTime, Utc};
use options_core::types::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Gate thresholds. Percentages are percent values (5 = 5%); the pause
/// rejection rate is a fraction (0.30 = 30%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub max_slippage_pct: Decimal,
    pub max_slippage_points: Decimal,
    pub requote_threshold_pct: Decimal,
    pub partial_fill_threshold_pct: Decimal,
    /// Quantity fraction suggested on a PARTIAL decision.
    pub partial_fill_fraction: Decimal,
    pub latency_ceiling_ms: u64,
    /// Rolling window length for all gate statistics.
    pub window_size: usize,
    /// Minimum observations before the circuit breaker can trip.
    pub min_samples: usize,
    pub pause_rejection_rate: Decimal,
    pub pause_latency_factor: Decimal,
    pub pause_slippage_factor: Decimal,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_slippage_pct: Decimal::new(5, 0),
            max_slippage_points: Decimal::new(10, 0),
            requote_threshold_pct: Decimal::new(3, 0),
            partial_fill_threshold_pct: Decimal::new(2, 0),
            partial_fill_fraction: Decimal::new(5, 1), // 0.5
            latency_ceiling_ms: 2000,
            window_size: 100,
            min_samples: 10,
            pause_rejection_rate: Decimal::new(30, 2), // 0.30
            pause_latency_factor: Decimal::new(15, 1), // 1.5
            pause_slippage_factor: Decimal::new(2, 0),
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_slippage_pct: env_or("GATE_MAX_SLIPPAGE_PCT", defaults.max_slippage_pct),
            max_slippage_points: env_or("GATE_MAX_SLIPPAGE_POINTS", defaults.max_slippage_points),
            requote_threshold_pct: env_or(
                "GATE_REQUOTE_THRESHOLD_PCT",
                defaults.requote_threshold_pct,
            ),
            partial_fill_threshold_pct: env_or(
                "GATE_PARTIAL_FILL_THRESHOLD_PCT",
                defaults.partial_fill_threshold_pct,
            ),
            partial_fill_fraction: env_or(
                "GATE_PARTIAL_FILL_FRACTION",
                defaults.partial_fill_fraction,
            ),
            latency_ceiling_ms: env_or("GATE_LATENCY_CEILING_MS", defaults.latency_ceiling_ms),
            window_size: env_or("GATE_WINDOW_SIZE", defaults.window_size),
            min_samples: env_or("GATE_MIN_SAMPLES", defaults.min_samples),
            pause_rejection_rate: env_or("GATE_PAUSE_REJECTION_RATE", defaults.pause_rejection_rate),
            pause_latency_factor: env_or("GATE_PAUSE_LATENCY_FACTOR", defaults.pause_latency_factor),
            pause_slippage_factor: env_or(
                "GATE_PAUSE_SLIPPAGE_FACTOR",
                defaults.pause_slippage_factor,
            ),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Outcome of a slippage check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlippageDecision {
    Execute,
    Reject {
        slippage_pct: Decimal,
        slippage_points: Decimal,
        reason: String,
    },
    Requote {
        suggested_price: Decimal,
        slippage_pct: Decimal,
    },
    Partial {
        fraction: Decimal,
        slippage_pct: Decimal,
    },
}

/// Why the circuit breaker wants the execution path paused.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    RejectionRate { rate: Decimal },
    SustainedLatency { avg_ms: u64, ceiling_ms: u64 },
    ExcessSlippage { avg_pct: Decimal, limit_pct: Decimal },
}

/// Rolling gate statistics for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct GateStats {
    pub checks: u64,
    pub rejections: u64,
    pub window_len: usize,
    pub avg_latency_ms: Option<u64>,
    pub avg_adverse_slippage_pct: Option<Decimal>,
}

#[derive(Debug, Default)]
struct Windows {
    /// Adverse slippage percentages (favorable moves recorded as zero).
    slippage_pcts: VecDeque<Decimal>,
    latencies_ms: VecDeque<u64>,
    /// True entries are rejected checks.
    outcomes: VecDeque<bool>,
}

/// Decision function over (signal price, live price) plus rolling statistics
/// that feed the pause circuit breaker.
pub struct SlippageLatencyGate {
    config: GateConfig,
    windows: RwLock<Windows>,
    checks: AtomicU64,
    rejections: AtomicU64,
}

impl SlippageLatencyGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(Windows::default()),
            checks: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Evaluate the move between the signal price and the live price for an
    /// order on `side`. Favorable movement always executes.
    pub fn check_slippage(
        &self,
        signal_price: Decimal,
        current_price: Decimal,
        side: OrderSide,
    ) -> SlippageDecision {
        self.checks.fetch_add(1, Ordering::Relaxed);

        let points = (current_price - signal_price).abs();
        let pct = if signal_price.is_zero() {
            Decimal::ZERO
        } else {
            points / signal_price * Decimal::new(100, 0)
        };

        let favorable = match side {
            // A seller collects more premium when the price rises
            OrderSide::Sell => current_price >= signal_price,
            OrderSide::Buy => current_price <= signal_price,
        };

        if favorable {
            self.push_sample(Decimal::ZERO, false);
            return SlippageDecision::Execute;
        }

        if pct > self.config.max_slippage_pct || points > self.config.max_slippage_points {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            self.push_sample(pct, true);
            let reason = format!(
                "adverse slippage {pct:.2}% ({points} points) beyond limits {}%/{} points",
                self.config.max_slippage_pct, self.config.max_slippage_points
            );
            warn!(%signal_price, %current_price, ?side, "{}", reason);
            return SlippageDecision::Reject {
                slippage_pct: pct,
                slippage_points: points,
                reason,
            };
        }

        self.push_sample(pct, false);

        if pct > self.config.requote_threshold_pct {
            debug!(%signal_price, %current_price, slippage_pct = %pct, "Requoting at live price");
            return SlippageDecision::Requote {
                suggested_price: current_price,
                slippage_pct: pct,
            };
        }

        if pct > self.config.partial_fill_threshold_pct {
            return SlippageDecision::Partial {
                fraction: self.config.partial_fill_fraction,
                slippage_pct: pct,
            };
        }

        SlippageDecision::Execute
    }

    /// Record a signal-to-broker round trip. Latency beyond the ceiling is
    /// recorded (feeding `should_pause`) but does not block on its own.
    pub fn track_latency(
        &self,
        signal_received_at: DateTime<Utc>,
        broker_responded_at: DateTime<Utc>,
    ) -> bool {
        let elapsed_ms = broker_responded_at
            .signed_duration_since(signal_received_at)
            .num_milliseconds()
            .max(0) as u64;

        {
            let mut w = self.windows.write().unwrap();
            w.latencies_ms.push_back(elapsed_ms);
            if w.latencies_ms.len() > self.config.window_size {
                w.latencies_ms.pop_front();
            }
        }

        let acceptable = elapsed_ms <= self.config.latency_ceiling_ms;
        if !acceptable {
            warn!(
                elapsed_ms,
                ceiling_ms = self.config.latency_ceiling_ms,
                "Broker round trip exceeded latency ceiling"
            );
        }
        acceptable
    }

    /// Circuit breaker for the whole execution path. Checked by the
    /// order-submission caller before every new order.
    pub fn should_pause(&self) -> Option<PauseReason> {
        let w = self.windows.read().unwrap();

        if w.outcomes.len() >= self.config.min_samples {
            let rejected = w.outcomes.iter().filter(|r| **r).count();
            let rate = Decimal::from(rejected) / Decimal::from(w.outcomes.len());
            if rate > self.config.pause_rejection_rate {
                return Some(PauseReason::RejectionRate { rate });
            }
        }

        if w.latencies_ms.len() >= self.config.min_samples {
            let avg_ms = w.latencies_ms.iter().sum::<u64>() / w.latencies_ms.len() as u64;
            let threshold =
                Decimal::from(self.config.latency_ceiling_ms) * self.config.pause_latency_factor;
            if Decimal::from(avg_ms) > threshold {
                return Some(PauseReason::SustainedLatency {
                    avg_ms,
                    ceiling_ms: self.config.latency_ceiling_ms,
                });
            }
        }

        if w.slippage_pcts.len() >= self.config.min_samples {
            let sum: Decimal = w.slippage_pcts.iter().copied().sum();
            let avg_pct = sum / Decimal::from(w.slippage_pcts.len());
            let limit_pct = self.config.max_slippage_pct * self.config.pause_slippage_factor;
            if avg_pct > limit_pct {
                return Some(PauseReason::ExcessSlippage { avg_pct, limit_pct });
            }
        }

        None
    }

    pub fn stats(&self) -> GateStats {
        let w = self.windows.read().unwrap();
        let avg_latency_ms = if w.latencies_ms.is_empty() {
            None
        } else {
            Some(w.latencies_ms.iter().sum::<u64>() / w.latencies_ms.len() as u64)
        };
        let avg_adverse_slippage_pct = if w.slippage_pcts.is_empty() {
            None
        } else {
            let sum: Decimal = w.slippage_pcts.iter().copied().sum();
            Some(sum / Decimal::from(w.slippage_pcts.len()))
        };
        GateStats {
            checks: self.checks.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            window_len: w.outcomes.len(),
            avg_latency_ms,
            avg_adverse_slippage_pct,
        }
    }

    fn push_sample(&self, adverse_pct: Decimal, rejected: bool) {
        let mut w = self.windows.write().unwrap();
        w.slippage_pcts.push_back(adverse_pct);
        if w.slippage_pcts.len() > self.config.window_size {
            w.slippage_pcts.pop_front();
        }
        w.outcomes.push_back(rejected);
        if w.outcomes.len() > self.config.window_size {
            w.outcomes.pop_front();
        }
    }
}
