//! End-to-end scenarios against the wired-up [`RiskEngine`]: a trade
//! lifecycle touching limits, positions, market data, and the batch
//! pipeline together, plus a throughput smoke test for the synchronous
//! pre-trade path.

use risk_engine::batch::RiskOperation;
use risk_engine::evaluator::Order;
use risk_engine::limits::{new_limit, LimitType};
use risk_engine::RiskEngineConfig;
use risk_engine::RiskEngine;
use common::{OrderType, Price, Side, Symbol, UserId};
use crossbeam::channel;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn user(s: &str) -> UserId {
    UserId::from(s)
}
fn sym(s: &str) -> Symbol {
    Symbol::from(s)
}

fn order(user_id: &str, symbol: &str, side: Side, quantity: f64, price: f64) -> Order {
    Order {
        user_id: user(user_id),
        symbol: sym(symbol),
        side,
        quantity,
        price,
        order_type: OrderType::Limit,
    }
}

#[test]
fn full_lifecycle_limit_fill_mark_and_account_risk() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());

    engine
        .set_limit(new_limit(user("u1"), sym(""), LimitType::Position, 10.0, None))
        .unwrap();

    let check = engine.validate_order(&order("u1", "BTC-USD", Side::Buy, 2.0, 50_000.0));
    assert!(check.passed);

    // Submit the fill through the batch pipeline and drain it with a
    // background worker, exactly as `main.rs` wires `spawn_batch_worker`.
    let pipeline = engine.batch_pipeline();
    let (positions, limits) = engine.shared_stores();
    let evaluator = engine.evaluator();
    {
        let pipeline = pipeline.clone();
        let positions = positions.clone();
        let limits = limits.clone();
        let evaluator = evaluator.clone();
        std::thread::spawn(move || pipeline.run(&positions, &limits, &evaluator));
    }
    let (reply, rx) = channel::bounded(1);
    pipeline
        .submit(RiskOperation::UpdatePosition {
            user_id: user("u1"),
            symbol: sym("BTC-USD"),
            signed_quantity: 2.0,
            price: 50_000.0,
            reply,
        })
        .unwrap();
    let position = rx.recv_timeout(Duration::from_secs(1)).expect("batch worker should apply the fill");
    assert_eq!(position.quantity, 2.0);

    engine.post_trade_check(&order("u1", "BTC-USD", Side::Buy, 2.0, 50_000.0), 0.0);

    engine.update_market_data(sym("BTC-USD"), Price(52_000.0)).unwrap();
    let update = engine.market_data_receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    engine.process_market_data(&update);

    let risk = engine.get_account_risk(&user("u1"));
    assert_eq!(risk.positions.len(), 1);
    assert!((risk.gross_exposure - 104_000.0).abs() < 1e-6);
    assert_eq!(risk.account.orders_today, 1);
    assert!((risk.account.daily_volume - 100_000.0).abs() < 1e-6);
}

#[test]
fn order_beyond_position_limit_is_rejected_before_any_fill() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());
    engine
        .set_limit(new_limit(user("u1"), sym(""), LimitType::Position, 1.0, None))
        .unwrap();

    let first = engine.validate_order(&order("u1", "BTC-USD", Side::Buy, 1.0, 50_000.0));
    assert!(first.passed);

    let (positions, _) = engine.shared_stores();
    positions.apply_trade(&user("u1"), &sym("BTC-USD"), 1.0, 50_000.0);

    let second = engine.validate_order(&order("u1", "BTC-USD", Side::Buy, 1.0, 50_000.0));
    assert!(!second.passed);
    assert!(second.violations[0].contains("Position size"));
}

#[test]
fn pre_trade_check_throughput_is_well_under_a_millisecond_each() {
    let engine = Arc::new(RiskEngine::new(&RiskEngineConfig::default()));
    engine
        .set_limit(new_limit(user(""), sym(""), LimitType::OrderSize, 1_000_000.0, None))
        .unwrap();

    let iterations = 10_000;
    let start = Instant::now();
    for i in 0..iterations {
        let o = order("load-user", "BTC-USD", Side::Buy, 1.0 + (i % 50) as f64, 50_000.0);
        let result = engine.validate_order(&o);
        assert!(result.passed);
    }
    let elapsed = start.elapsed();
    let per_check = elapsed / iterations;
    assert!(
        per_check < Duration::from_millis(1),
        "pre-trade check averaged {per_check:?}, expected well under 1ms"
    );
}
