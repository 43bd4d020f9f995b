//! Integration tests for component interactions.
//!
//! These tests verify that the major components work together correctly.

use std::sync::Arc;

use chrono::NaiveDate;
use options_core::db::MemoryOrderStore;
use options_core::traits::{BrokerClient, OrderStore};
use options_core::types::{
    DiscrepancyKind, EntrySignal, HedgeMode, HedgedPosition, OptionContract, OptionLeg,
    OptionType, OrderRecord, OrderSide, OrderSpec, OrderStatus, ReconcileAction, RiskLimits,
    SignalType, StopStage,
};
use risk_manager::{
    Admission, GateConfig, ProgressiveStopEngine, RiskLedger, SlippageDecision,
    SlippageLatencyGate, StopConfig,
};
use rust_decimal::Decimal;
use trading_engine::{
    EngineService, EngineSettings, ExitReason, LogNotifier, OrderReconciler, PaperBroker,
    ReconcilerConfig, SimMarketData,
};

fn expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 28).unwrap()
}

fn put_contract(strike: i64) -> OptionContract {
    OptionContract::new("NIFTY", Decimal::new(strike, 0), OptionType::Put, expiry())
}

fn sold_put(strike: i64, price: i64, lots: u32) -> HedgedPosition {
    HedgedPosition::new(
        SignalType::Breakout,
        OptionLeg::new(put_contract(strike), OrderSide::Sell, Decimal::new(price, 0), lots),
        None,
        50,
    )
}

/// Scenario: max exposure 200,000; existing exposure 150,000; a new signal
/// carrying 60,000 net exposure must be blocked without mutating the ledger.
#[tokio::test]
async fn test_exposure_block_scenario() {
    let ledger = RiskLedger::new(
        RiskLimits {
            max_exposure: Decimal::new(200_000, 0),
            ..Default::default()
        },
        50,
    );
    ledger.record(sold_put(22_500, 300, 10)).unwrap(); // 150,000

    let admission = ledger
        .admit_new(
            SignalType::Breakout,
            8,
            Decimal::new(150, 0), // 8 * 150 * 50 = 60,000
            0,
            Decimal::ZERO,
        )
        .await;

    assert!(matches!(admission, Admission::Block { .. }));
    assert_eq!(ledger.aggregate_exposure(), Decimal::new(150_000, 0));
    assert_eq!(ledger.open_count(), 1);
}

/// Scenario: 6000-per-lot initial stop on 10 lots starts the trigger at
/// -60,000; profit reaching 45% of the 100,000 reference with a 40% trigger
/// locks breakeven.
#[test]
fn test_profit_lock_scenario() {
    let engine = ProgressiveStopEngine::new(StopConfig::default());
    // Sold 10 lots at 200, lot size 50: reference max profit = 100,000
    let mut position = sold_put(22_500, 200, 10);
    position.entry_time = NaiveDate::from_ymd_opt(2025, 8, 4)
        .unwrap()
        .and_hms_opt(9, 20, 0)
        .unwrap()
        .and_utc();
    let today = position.entry_time.date_naive();

    let eval = engine.evaluate(&position, Decimal::ZERO, today);
    assert_eq!(eval.state.stage, StopStage::Initial);
    assert_eq!(eval.state.trigger_pnl, Decimal::new(-60_000, 0));

    let eval = engine.evaluate(&position, Decimal::new(45_000, 0), today);
    assert_eq!(eval.state.stage, StopStage::ProfitLocked);
    assert_eq!(eval.state.trigger_pnl, Decimal::ZERO);
}

/// Scenario: a sell whose live price moved from 100 to 103 is favorable and
/// executes regardless of every configured threshold.
#[test]
fn test_favorable_slippage_scenario() {
    let gate = SlippageLatencyGate::new(GateConfig {
        max_slippage_pct: Decimal::new(1, 2), // deliberately punishing limits
        max_slippage_points: Decimal::new(1, 2),
        ..Default::default()
    });

    let decision = gate.check_slippage(
        Decimal::new(100, 0),
        Decimal::new(103, 0),
        OrderSide::Sell,
    );
    assert_eq!(decision, SlippageDecision::Execute);
}

/// Scenario: internal EXECUTED vs broker REJECTED must alert and leave the
/// internal status untouched pending human resolution.
#[tokio::test]
async fn test_executed_rejected_discrepancy_scenario() {
    let market = Arc::new(SimMarketData::new());
    let broker = Arc::new(PaperBroker::new(market));
    let store = Arc::new(MemoryOrderStore::new());
    let ledger = Arc::new(RiskLedger::new(RiskLimits::default(), 50));
    let reconciler = OrderReconciler::new(
        broker.clone(),
        store.clone(),
        Arc::new(LogNotifier),
        ledger,
        ReconcilerConfig::default(),
    );

    let spec = OrderSpec {
        instrument: put_contract(22_500).instrument_id(),
        side: OrderSide::Sell,
        quantity: 2,
        price: Decimal::new(200, 0),
        linked_position_id: None,
    };
    let order_id = broker.place_order(&spec).await.unwrap();
    store
        .insert(&OrderRecord::new(order_id.clone(), &spec, OrderStatus::Executed))
        .await
        .unwrap();
    broker.set_order_status(&order_id, "REJECTED");

    let found = reconciler.reconcile_once().await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].action_taken, ReconcileAction::Alert);
    assert_eq!(
        store.get_order(&order_id).await.unwrap().unwrap().status,
        OrderStatus::Executed
    );
}

/// Reconciliation convergence: when internal and broker state differ only in
/// status fields, one pass syncs everything and the next finds nothing new.
#[tokio::test]
async fn test_reconciliation_convergence() {
    let market = Arc::new(SimMarketData::new());
    let broker = Arc::new(PaperBroker::new(market));
    let store = Arc::new(MemoryOrderStore::new());
    let ledger = Arc::new(RiskLedger::new(RiskLimits::default(), 50));
    let reconciler = OrderReconciler::new(
        broker.clone(),
        store.clone(),
        Arc::new(LogNotifier),
        ledger,
        ReconcilerConfig::default(),
    );

    // Three placed orders the paper broker immediately filled
    for i in 0..3 {
        let spec = OrderSpec {
            instrument: put_contract(22_500 - i * 100).instrument_id(),
            side: OrderSide::Sell,
            quantity: 1,
            price: Decimal::new(200, 0),
            linked_position_id: None,
        };
        let order_id = broker.place_order(&spec).await.unwrap();
        store
            .insert(&OrderRecord::new(order_id, &spec, OrderStatus::Placed))
            .await
            .unwrap();
    }

    let first = reconciler.reconcile_once().await.unwrap();
    assert_eq!(first.len(), 3);
    assert!(first
        .iter()
        .all(|d| d.kind == DiscrepancyKind::StatusMismatch
            && d.action_taken == ReconcileAction::Sync));

    for record in store.active_orders().await.unwrap() {
        assert_eq!(record.status, OrderStatus::Executed);
    }

    let second = reconciler.reconcile_once().await.unwrap();
    assert!(second.is_empty());
}

/// Removing the same position twice folds its P&L into the day exactly once.
#[tokio::test]
async fn test_idempotent_removal() {
    let ledger = RiskLedger::new(RiskLimits::default(), 50);
    let position = sold_put(22_500, 200, 2);
    let id = position.id;
    ledger.record(position).unwrap();

    ledger.remove_position(id, Decimal::new(-7_500, 0)).await;
    ledger.remove_position(id, Decimal::new(-7_500, 0)).await;

    assert_eq!(ledger.status().await.daily_pnl, Decimal::new(-7_500, 0));
}

/// Stop stages observed over increasing trading days never decrease, even
/// when profit collapses after locking.
#[test]
fn test_monotonic_stop_stages() {
    let engine = ProgressiveStopEngine::new(StopConfig::default());
    let mut position = sold_put(22_500, 200, 10);
    let monday = NaiveDate::from_ymd_opt(2025, 8, 4).unwrap();
    position.entry_time = monday.and_hms_opt(9, 20, 0).unwrap().and_utc();

    let pnl_path = [
        Decimal::new(45_000, 0),  // day 1: locks profit
        Decimal::new(-5_000, 0),  // day 2: profit gone, stage must hold
        Decimal::new(1_000, 0),   // day 3: breakeven
        Decimal::new(30_000, 0),  // day 4: profit floor
    ];

    let mut last = StopStage::Initial;
    for (offset, pnl) in pnl_path.iter().enumerate() {
        let today = monday + chrono::Duration::days(offset as i64);
        let eval = engine.evaluate(&position, *pnl, today);
        assert!(eval.state.stage >= last);
        last = eval.state.stage;
        position.stop_state = eval.state;
    }
    assert_eq!(last, StopStage::Day4Lock);
}

/// Full paper round trip through the facade: open a hedged position, let the
/// premiums decay, and close it manually.
#[tokio::test]
async fn test_paper_engine_round_trip() {
    let market = Arc::new(SimMarketData::new());
    let broker = Arc::new(PaperBroker::new(market.clone()));
    let store = Arc::new(MemoryOrderStore::new());
    let engine = EngineService::new(
        broker.clone(),
        market.clone(),
        store.clone(),
        Arc::new(LogNotifier),
        EngineSettings {
            lot_size: 50,
            ..Default::default()
        },
    );

    let main = put_contract(22_500);
    let hedge = put_contract(22_300);
    market.set_price(&main.instrument_id(), Decimal::new(200, 0));
    market.set_price(&hedge.instrument_id(), Decimal::new(60, 0));

    let signal = EntrySignal::new(
        SignalType::Breakout,
        "NIFTY",
        expiry(),
        OptionType::Put,
        Decimal::new(22_500, 0),
        2,
        Decimal::new(200, 0),
        HedgeMode::Offset(Decimal::new(200, 0)),
    );
    let position = engine.open_position(&signal).await.unwrap();
    assert_eq!(engine.ledger().open_count(), 1);
    assert_eq!(store.len(), 2);

    // The broker now holds a short main leg and a long hedge
    let broker_positions = broker.get_positions().await.unwrap();
    assert_eq!(broker_positions.len(), 2);

    market.set_price(&main.instrument_id(), Decimal::new(120, 0));
    market.set_price(&hedge.instrument_id(), Decimal::new(30, 0));

    let realized = engine
        .request_exit(position.id, ExitReason::Manual)
        .await
        .unwrap();
    // Main +8000, hedge -3000
    assert_eq!(realized, Decimal::new(5_000, 0));
    assert_eq!(engine.ledger().open_count(), 0);
    assert_eq!(store.len(), 4);

    // Both broker-side positions are flat after the exit
    assert!(broker.get_positions().await.unwrap().is_empty());
}

/// The circuit breaker blocks new entries through the facade after a burst
/// of rejected checks.
#[tokio::test]
async fn test_pause_blocks_new_entries() {
    let market = Arc::new(SimMarketData::new());
    let broker = Arc::new(PaperBroker::new(market.clone()));
    let store = Arc::new(MemoryOrderStore::new());
    let engine = EngineService::new(
        broker,
        market.clone(),
        store,
        Arc::new(LogNotifier),
        EngineSettings {
            lot_size: 50,
            ..Default::default()
        },
    );

    // Force a >30% rejection rate over the minimum window
    for _ in 0..5 {
        engine.check_slippage(Decimal::new(100, 0), Decimal::new(80, 0), OrderSide::Sell);
    }
    for _ in 0..5 {
        engine.check_slippage(Decimal::new(100, 0), Decimal::new(100, 0), OrderSide::Sell);
    }

    let result = engine
        .open_position(&EntrySignal::new(
            SignalType::Breakout,
            "NIFTY",
            expiry(),
            OptionType::Put,
            Decimal::new(22_500, 0),
            2,
            Decimal::new(200, 0),
            HedgeMode::Offset(Decimal::new(200, 0)),
        ))
        .await;
    assert!(matches!(
        result,
        Err(options_core::Error::TradingPaused { .. })
    ));
}

/// Engine lifecycle: loops start and stop cleanly.
#[tokio::test]
async fn test_engine_lifecycle() {
    let market = Arc::new(SimMarketData::new());
    let broker = Arc::new(PaperBroker::new(market.clone()));
    let store = Arc::new(MemoryOrderStore::new());
    let mut engine = EngineService::new(
        broker,
        market,
        store,
        Arc::new(LogNotifier),
        EngineSettings::default(),
    );

    engine.start();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    engine.shutdown().await;
    // The reconciler's first interval tick fires immediately on start
    assert!(engine.reconciliation_stats().passes >= 1);
}
