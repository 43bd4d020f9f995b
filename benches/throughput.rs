//! Throughput benchmarks for bulk operations.
//!
//! Run with: `cargo bench --bench throughput`

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use rust_decimal::Decimal;

use options_core::types::{
    HedgedPosition, OptionContract, OptionLeg, OptionType, OrderSide, SignalType,
};
use risk_manager::{GateConfig, ProgressiveStopEngine, SlippageLatencyGate, StopConfig};

fn expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 28).unwrap()
}

/// Generate a batch of hedged positions with randomized entries.
fn generate_positions(count: usize) -> Vec<HedgedPosition> {
    let mut rng = rand::thread_rng();
    let mut positions = Vec::with_capacity(count);

    for _ in 0..count {
        let strike = 22_000 + rng.gen_range(0..20) * 50;
        let main_price = Decimal::new(rng.gen_range(120..320), 0);
        let hedge_price = Decimal::new(rng.gen_range(30..90), 0);
        let lots = rng.gen_range(1..10);

        positions.push(HedgedPosition::new(
            SignalType::Breakout,
            OptionLeg::new(
                OptionContract::new("NIFTY", Decimal::new(strike, 0), OptionType::Put, expiry()),
                OrderSide::Sell,
                main_price,
                lots,
            ),
            Some(OptionLeg::new(
                OptionContract::new(
                    "NIFTY",
                    Decimal::new(strike - 200, 0),
                    OptionType::Put,
                    expiry(),
                ),
                OrderSide::Buy,
                hedge_price,
                lots,
            )),
            50,
        ));
    }

    positions
}

/// Benchmark evaluating stop rules across a book of positions.
fn bench_bulk_stop_evaluation(c: &mut Criterion) {
    let engine = ProgressiveStopEngine::new(StopConfig::default());
    let mut group = c.benchmark_group("bulk_stop_evaluation");
    let today = expiry();

    for position_count in [10, 50, 100, 500, 1000].iter() {
        let positions = generate_positions(*position_count);

        group.throughput(Throughput::Elements(*position_count as u64));
        group.bench_with_input(
            BenchmarkId::new("evaluate_all", position_count),
            &positions,
            |b, positions| {
                b.iter(|| {
                    let triggered: Vec<_> = positions
                        .iter()
                        .map(|p| engine.evaluate(p, Decimal::new(-5_000, 0), today))
                        .filter(|e| e.should_exit)
                        .collect();
                    black_box(triggered)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark bulk P&L calculations across a book.
fn bench_bulk_pnl(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_pnl");

    for position_count in [10, 50, 100, 500, 1000].iter() {
        let positions = generate_positions(*position_count);

        group.throughput(Throughput::Elements(*position_count as u64));
        group.bench_with_input(
            BenchmarkId::new("calculate_all", position_count),
            &positions,
            |b, positions| {
                b.iter(|| {
                    let pnls: Vec<Decimal> = positions
                        .iter()
                        .map(|p| {
                            p.unrealized_pnl(Decimal::new(185, 0), Some(Decimal::new(52, 0)))
                        })
                        .collect();
                    black_box(pnls)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark aggregate exposure sums across a book.
fn bench_exposure_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("exposure_aggregation");

    for position_count in [10, 100, 1000, 5000].iter() {
        let positions = generate_positions(*position_count);

        group.throughput(Throughput::Elements(*position_count as u64));
        group.bench_with_input(
            BenchmarkId::new("sum", position_count),
            &positions,
            |b, positions| {
                b.iter(|| {
                    let total: Decimal = positions.iter().map(|p| p.net_exposure).sum();
                    black_box(total)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark bursts of slippage checks through one shared gate.
fn bench_slippage_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("slippage_burst");

    for check_count in [100, 500, 1000, 5000].iter() {
        let mut rng = rand::thread_rng();
        let prices: Vec<Decimal> = (0..*check_count)
            .map(|_| Decimal::new(rng.gen_range(90..110), 0))
            .collect();

        group.throughput(Throughput::Elements(*check_count as u64));
        group.bench_with_input(
            BenchmarkId::new("check_all", check_count),
            &prices,
            |b, prices| {
                b.iter(|| {
                    let gate = SlippageLatencyGate::new(GateConfig::default());
                    for price in prices {
                        black_box(gate.check_slippage(
                            Decimal::new(100, 0),
                            *price,
                            OrderSide::Sell,
                        ));
                    }
                })
            },
        );
    }

    group.finish();
}

/// Benchmark JSON serialization throughput for position batches.
fn bench_position_batch_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("position_batch_serialization");

    for count in [10, 50, 100, 500].iter() {
        let positions = generate_positions(*count);

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(
            BenchmarkId::new("serialize_batch", count),
            &positions,
            |b, positions| {
                b.iter(|| {
                    let serialized: Vec<_> = positions
                        .iter()
                        .map(|p| serde_json::to_string(p).unwrap())
                        .collect();
                    black_box(serialized)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_bulk_stop_evaluation,
    bench_bulk_pnl,
    bench_exposure_aggregation,
    bench_slippage_burst,
    bench_position_batch_serialization,
);

criterion_main!(benches);
