//! Gated order execution.
//!
//! Every new order passes the circuit breaker and the slippage gate before
//! it reaches the broker; every broker call runs under a timeout. Rejections
//! are classified once, here, at the broker boundary.

use chrono::{DateTime, Utc};
use options_core::traits::{AlertLevel, BrokerClient, Notifier, OrderStore};
use options_core::types::{
    OrderRecord, OrderSide, OrderSpec, OrderStatus, RejectionClass,
};
use options_core::{Error, Result};
use risk_manager::{SlippageDecision, SlippageLatencyGate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Timeout applied to every broker call.
    pub broker_timeout_ms: u64,
    /// Resubmissions allowed for price-class rejections.
    pub max_retry_attempts: u32,
    /// Percent buffer added to the fresh quote on a price retry.
    pub price_retry_buffer_pct: Decimal,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            broker_timeout_ms: 5000,
            max_retry_attempts: 2,
            price_retry_buffer_pct: Decimal::new(5, 1), // 0.5%
        }
    }
}

/// What became of a rejected order.
#[derive(Debug)]
pub enum RejectionOutcome {
    /// Terminal; marked FAILED (and alerted).
    Failed,
    /// Resubmitted at a refreshed price.
    Retried { order: OrderRecord },
    /// Queued for the next trading session.
    Queued,
}

/// Order submission path with slippage gating, timeouts, and rejection
/// recovery.
pub struct OrderExecutor {
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    gate: Arc<SlippageLatencyGate>,
    config: ExecutorConfig,
    /// Orders deferred by market-closed rejections, drained at next session.
    session_queue: Mutex<Vec<OrderSpec>>,
}

impl OrderExecutor {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        gate: Arc<SlippageLatencyGate>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            broker,
            store,
            notifier,
            gate,
            config,
            session_queue: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Submit a new entry order. Checks the circuit breaker, then the
    /// slippage gate against the live quote, then places the order.
    pub async fn submit(
        &self,
        spec: OrderSpec,
        signal_price: Decimal,
        signal_received_at: DateTime<Utc>,
    ) -> Result<OrderRecord> {
        if let Some(reason) = self.gate.should_pause() {
            warn!(?reason, instrument = %spec.instrument, "Execution paused by circuit breaker");
            return Err(Error::TradingPaused {
                reason: format!("{reason:?}"),
            });
        }
        self.submit_gated(spec, signal_price, signal_received_at, true)
            .await
    }

    /// Submit an exit order. Exits reduce risk, so they bypass the circuit
    /// breaker and the slippage ladder; latency is still recorded.
    pub async fn submit_exit(
        &self,
        spec: OrderSpec,
        signal_price: Decimal,
        signal_received_at: DateTime<Utc>,
    ) -> Result<OrderRecord> {
        self.submit_gated(spec, signal_price, signal_received_at, false)
            .await
    }

    async fn submit_gated(
        &self,
        mut spec: OrderSpec,
        signal_price: Decimal,
        signal_received_at: DateTime<Utc>,
        enforce_gate: bool,
    ) -> Result<OrderRecord> {
        if enforce_gate {
            let current = self.timed(self.broker.get_quote(&spec.instrument)).await?;
            match self.gate.check_slippage(signal_price, current, spec.side) {
                SlippageDecision::Execute => {}
                SlippageDecision::Requote {
                    suggested_price, ..
                } => {
                    debug!(
                        instrument = %spec.instrument,
                        from = %spec.price,
                        to = %suggested_price,
                        "Requoting order at live price"
                    );
                    spec.price = suggested_price;
                }
                SlippageDecision::Partial { fraction, .. } => {
                    let reduced = (Decimal::from(spec.quantity) * fraction)
                        .floor()
                        .to_u32()
                        .unwrap_or(1)
                        .max(1);
                    debug!(
                        instrument = %spec.instrument,
                        from = spec.quantity,
                        to = reduced,
                        "Reducing quantity on adverse slippage"
                    );
                    spec.quantity = reduced;
                }
                SlippageDecision::Reject { reason, .. } => {
                    return Err(Error::SlippageRejected { reason });
                }
            }
        }

        let order_id = self.timed(self.broker.place_order(&spec)).await?;
        self.gate.track_latency(signal_received_at, Utc::now());

        let record = OrderRecord::new(order_id, &spec, OrderStatus::Placed);
        self.store.insert(&record).await?;

        info!(
            order_id = %record.order_id,
            instrument = %record.instrument,
            side = ?record.side,
            quantity = record.quantity,
            price = %record.price,
            "Order placed"
        );
        Ok(record)
    }

    pub async fn cancel(&self, order_id: &str) -> Result<()> {
        self.timed(self.broker.cancel_order(order_id)).await?;
        self.store
            .update_status(order_id, OrderStatus::Cancelled, None)
            .await?;
        info!(order_id, "Order cancelled");
        Ok(())
    }

    /// Classify a broker rejection and take the configured recovery path.
    /// Margin and unknown rejections are terminal; price rejections retry
    /// with a fresh quote plus a small buffer; market-closed orders queue
    /// for the next session.
    pub async fn handle_rejection(
        &self,
        record: &OrderRecord,
        reason: &str,
    ) -> Result<RejectionOutcome> {
        let class = RejectionClass::classify(reason);
        warn!(
            order_id = %record.order_id,
            ?class,
            reason,
            "Order rejected by broker"
        );

        match class {
            RejectionClass::Margin => {
                self.store
                    .update_status(&record.order_id, OrderStatus::Failed, None)
                    .await?;
                self.notifier
                    .send_alert(
                        AlertLevel::Critical,
                        "Order rejected: margin",
                        &format!(
                            "Order {} on {} rejected for margin: {}",
                            record.order_id, record.instrument, reason
                        ),
                        None,
                    )
                    .await;
                Ok(RejectionOutcome::Failed)
            }
            RejectionClass::Price => {
                if record.retry_count >= self.config.max_retry_attempts {
                    self.store
                        .update_status(&record.order_id, OrderStatus::Failed, None)
                        .await?;
                    self.notifier
                        .send_alert(
                            AlertLevel::Critical,
                            "Order retries exhausted",
                            &format!(
                                "Order {} on {} failed after {} price retries",
                                record.order_id, record.instrument, record.retry_count
                            ),
                            None,
                        )
                        .await;
                    return Ok(RejectionOutcome::Failed);
                }

                self.store
                    .update_status(&record.order_id, OrderStatus::Rejected, None)
                    .await?;

                // Fresh quote plus a buffer against further movement
                let quote = self.timed(self.broker.get_quote(&record.instrument)).await?;
                let buffer = quote * self.config.price_retry_buffer_pct / Decimal::new(100, 0);
                let price = match record.side {
                    OrderSide::Buy => quote + buffer,
                    OrderSide::Sell => quote - buffer,
                };

                let spec = record.respec(price);
                let order_id = self.timed(self.broker.place_order(&spec)).await?;
                let mut retried = OrderRecord::new(order_id, &spec, OrderStatus::Placed);
                retried.retry_count = record.retry_count + 1;
                self.store.insert(&retried).await?;

                info!(
                    original = %record.order_id,
                    retry = %retried.order_id,
                    attempt = retried.retry_count,
                    price = %price,
                    "Resubmitted rejected order at refreshed price"
                );
                Ok(RejectionOutcome::Retried { order: retried })
            }
            RejectionClass::MarketClosed => {
                self.store
                    .update_status(&record.order_id, OrderStatus::Rejected, None)
                    .await?;
                self.session_queue
                    .lock()
                    .unwrap()
                    .push(record.respec(record.price));
                self.notifier
                    .send_alert(
                        AlertLevel::Warning,
                        "Order queued for next session",
                        &format!(
                            "Order {} on {} rejected outside market hours",
                            record.order_id, record.instrument
                        ),
                        None,
                    )
                    .await;
                Ok(RejectionOutcome::Queued)
            }
            RejectionClass::Unknown => {
                self.store
                    .update_status(&record.order_id, OrderStatus::Failed, None)
                    .await?;
                self.notifier
                    .send_alert(
                        AlertLevel::Critical,
                        "Order rejected: unclassified",
                        &format!(
                            "Order {} on {} rejected with unrecognized reason: {}",
                            record.order_id, record.instrument, reason
                        ),
                        None,
                    )
                    .await;
                Ok(RejectionOutcome::Failed)
            }
        }
    }

    /// Take all orders deferred to the next trading session.
    pub fn take_session_queue(&self) -> Vec<OrderSpec> {
        std::mem::take(&mut self.session_queue.lock().unwrap())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::LogNotifier;
    use crate::paper::{PaperBroker, SimMarketData};
    use async_trait::async_trait;
    use mockall::mock;
    use options_core::db::MemoryOrderStore;
    use options_core::types::{BrokerOrder, BrokerPosition};
    use risk_manager::GateConfig;

    mock! {
        Broker {}

        #[async_trait]
        impl BrokerClient for Broker {
            async fn place_order(&self, spec: &OrderSpec) -> Result<String>;
            async fn cancel_order(&self, order_id: &str) -> Result<()>;
            async fn get_orders(&self) -> Result<Vec<BrokerOrder>>;
            async fn get_positions(&self) -> Result<Vec<BrokerPosition>>;
            async fn get_quote(&self, instrument: &str) -> Result<Decimal>;
        }
    }

    fn spec(price: i64) -> OrderSpec {
        OrderSpec {
            instrument: "NIFTY-250828-22500-PE".to_string(),
            side: OrderSide::Sell,
            quantity: 4,
            price: Decimal::new(price, 0),
            linked_position_id: None,
        }
    }

    fn executor_with(
        broker: Arc<dyn BrokerClient>,
        store: Arc<MemoryOrderStore>,
    ) -> OrderExecutor {
        OrderExecutor::new(
            broker,
            store,
            Arc::new(LogNotifier),
            Arc::new(SlippageLatencyGate::new(GateConfig::default())),
            ExecutorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_submit_places_and_records() {
        let market = Arc::new(SimMarketData::new());
        market.set_price("NIFTY-250828-22500-PE", Decimal::new(200, 0));
        let store = Arc::new(MemoryOrderStore::new());
        let executor = executor_with(Arc::new(PaperBroker::new(market)), store.clone());

        let record = executor
            .submit(spec(200), Decimal::new(200, 0), Utc::now())
            .await
            .unwrap();

        assert_eq!(record.status, OrderStatus::Placed);
        assert!(store.get_order(&record.order_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_submit_rejects_on_adverse_slippage() {
        let market = Arc::new(SimMarketData::new());
        // Seller's quote collapsed 200 -> 180: 10% adverse
        market.set_price("NIFTY-250828-22500-PE", Decimal::new(180, 0));
        let store = Arc::new(MemoryOrderStore::new());
        let executor = executor_with(Arc::new(PaperBroker::new(market)), store.clone());

        let result = executor
            .submit(spec(200), Decimal::new(200, 0), Utc::now())
            .await;
        assert!(matches!(result, Err(Error::SlippageRejected { .. })));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_submit_requotes_within_band() {
        let market = Arc::new(SimMarketData::new());
        // 4% adverse: requote band
        market.set_price("NIFTY-250828-22500-PE", Decimal::new(192, 0));
        let store = Arc::new(MemoryOrderStore::new());
        let executor = executor_with(Arc::new(PaperBroker::new(market)), store.clone());

        let record = executor
            .submit(spec(200), Decimal::new(200, 0), Utc::now())
            .await
            .unwrap();
        assert_eq!(record.price, Decimal::new(192, 0));
    }

    #[tokio::test]
    async fn test_submit_exit_bypasses_gate() {
        let market = Arc::new(SimMarketData::new());
        // Same collapsed quote that rejects entries
        market.set_price("NIFTY-250828-22500-PE", Decimal::new(180, 0));
        let store = Arc::new(MemoryOrderStore::new());
        let executor = executor_with(Arc::new(PaperBroker::new(market)), store.clone());

        let record = executor
            .submit_exit(spec(200), Decimal::new(200, 0), Utc::now())
            .await
            .unwrap();
        assert_eq!(record.status, OrderStatus::Placed);
    }

    /// Broker whose quote endpoint never answers in time.
    struct SlowBroker;

    #[async_trait]
    impl BrokerClient for SlowBroker {
        async fn place_order(&self, _spec: &OrderSpec) -> Result<String> {
            Ok("SLOW-1".to_string())
        }
        async fn cancel_order(&self, _order_id: &str) -> Result<()> {
            Ok(())
        }
        async fn get_orders(&self) -> Result<Vec<BrokerOrder>> {
            Ok(Vec::new())
        }
        async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
            Ok(Vec::new())
        }
        async fn get_quote(&self, _instrument: &str) -> Result<Decimal> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Decimal::new(200, 0))
        }
    }

    #[tokio::test]
    async fn test_broker_timeout_maps_to_retryable_error() {
        let store = Arc::new(MemoryOrderStore::new());
        let executor = OrderExecutor::new(
            Arc::new(SlowBroker),
            store,
            Arc::new(LogNotifier),
            Arc::new(SlippageLatencyGate::new(GateConfig::default())),
            ExecutorConfig {
                broker_timeout_ms: 50,
                ..Default::default()
            },
        );

        let result = executor
            .submit(spec(200), Decimal::new(200, 0), Utc::now())
            .await;
        match result {
            Err(e) => assert!(e.is_retryable()),
            Ok(_) => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn test_broker_error_propagates() {
        let mut broker = MockBroker::new();
        broker
            .expect_get_quote()
            .returning(|_| Ok(Decimal::new(200, 0)));
        broker
            .expect_place_order()
            .returning(|_| Err(Error::Broker("exchange unavailable".to_string())));

        let store = Arc::new(MemoryOrderStore::new());
        let executor = executor_with(Arc::new(broker), store.clone());

        let result = executor
            .submit(spec(200), Decimal::new(200, 0), Utc::now())
            .await;
        assert!(matches!(result, Err(Error::Broker(_))));
        // Nothing was recorded for the failed placement
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_margin_rejection_is_terminal() {
        let market = Arc::new(SimMarketData::new());
        let store = Arc::new(MemoryOrderStore::new());
        let executor = executor_with(Arc::new(PaperBroker::new(market)), store.clone());

        let record = OrderRecord::new("B-1", &spec(200), OrderStatus::Placed);
        store.insert(&record).await.unwrap();

        let outcome = executor
            .handle_rejection(&record, "RMS: insufficient funds")
            .await
            .unwrap();
        assert!(matches!(outcome, RejectionOutcome::Failed));
        assert_eq!(
            store.get_order("B-1").await.unwrap().unwrap().status,
            OrderStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_price_rejection_retries_with_buffer() {
        let market = Arc::new(SimMarketData::new());
        market.set_price("NIFTY-250828-22500-PE", Decimal::new(200, 0));
        let store = Arc::new(MemoryOrderStore::new());
        let executor = executor_with(Arc::new(PaperBroker::new(market)), store.clone());

        let record = OrderRecord::new("B-1", &spec(195), OrderStatus::Placed);
        store.insert(&record).await.unwrap();

        let outcome = executor
            .handle_rejection(&record, "price outside circuit limits")
            .await
            .unwrap();
        match outcome {
            RejectionOutcome::Retried { order } => {
                assert_eq!(order.retry_count, 1);
                // Sell retry undercuts the fresh 200 quote by 0.5%
                assert_eq!(order.price, Decimal::new(199, 0));
            }
            other => panic!("expected retry, got {other:?}"),
        }
        assert_eq!(
            store.get_order("B-1").await.unwrap().unwrap().status,
            OrderStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_price_retries_exhaust_to_failed() {
        let market = Arc::new(SimMarketData::new());
        market.set_price("NIFTY-250828-22500-PE", Decimal::new(200, 0));
        let store = Arc::new(MemoryOrderStore::new());
        let executor = executor_with(Arc::new(PaperBroker::new(market)), store.clone());

        let mut record = OrderRecord::new("B-9", &spec(195), OrderStatus::Placed);
        record.retry_count = 2; // already at max_retry_attempts
        store.insert(&record).await.unwrap();

        let outcome = executor
            .handle_rejection(&record, "price outside circuit limits")
            .await
            .unwrap();
        assert!(matches!(outcome, RejectionOutcome::Failed));
        assert_eq!(
            store.get_order("B-9").await.unwrap().unwrap().status,
            OrderStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_market_closed_queues_for_next_session() {
        let market = Arc::new(SimMarketData::new());
        let store = Arc::new(MemoryOrderStore::new());
        let executor = executor_with(Arc::new(PaperBroker::new(market)), store.clone());

        let record = OrderRecord::new("B-2", &spec(200), OrderStatus::Placed);
        store.insert(&record).await.unwrap();

        let outcome = executor
            .handle_rejection(&record, "Market is closed")
            .await
            .unwrap();
        assert!(matches!(outcome, RejectionOutcome::Queued));

        let queued = executor.take_session_queue();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].instrument, record.instrument);
        assert!(executor.take_session_queue().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_rejection_fails_conservatively() {
        let market = Arc::new(SimMarketData::new());
        let store = Arc::new(MemoryOrderStore::new());
        let executor = executor_with(Arc::new(PaperBroker::new(market)), store.clone());

        let record = OrderRecord::new("B-3", &spec(200), OrderStatus::Placed);
        store.insert(&record).await.unwrap();

        let outcome = executor
            .handle_rejection(&record, "gateway error 502")
            .await
            .unwrap();
        assert!(matches!(outcome, RejectionOutcome::Failed));
        assert_eq!(
            store.get_order("B-3").await.unwrap().unwrap().status,
            OrderStatus::Failed
        );
    }
}
