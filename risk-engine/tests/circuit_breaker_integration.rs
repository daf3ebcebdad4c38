//! Integration coverage of the circuit breaker as seen through the
//! wired-up engine: a shock on one symbol must not affect another, and
//! a tripped breaker must actually block `validate_order`.

use risk_engine::config::RiskEngineConfig;
use risk_engine::evaluator::Order;
use risk_engine::RiskEngine;
use common::{OrderType, Price, Side, Symbol, UserId};
use std::time::Duration;

fn order(symbol: &str, quantity: f64, price: f64) -> Order {
    Order {
        user_id: UserId::from("trader-1"),
        symbol: Symbol::from(symbol),
        side: Side::Buy,
        quantity,
        price,
        order_type: OrderType::Limit,
    }
}

/// Submits `symbol`/`price` through the validated ingress queue and
/// applies it immediately, exactly as `run_market_data_worker` would.
fn mark(engine: &RiskEngine, symbol: &str, price: f64) {
    engine.update_market_data(Symbol::from(symbol), Price(price)).unwrap();
    let update = engine.market_data_receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    engine.process_market_data(&update);
}

#[test]
fn shock_on_one_symbol_does_not_block_another() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());

    mark(&engine, "BTC-USD", 50_000.0);
    mark(&engine, "BTC-USD", 60_000.0);
    mark(&engine, "ETH-USD", 3_000.0);

    assert!(engine.validate_order(&order("ETH-USD", 1.0, 3_000.0)).passed);
    let btc_result = engine.validate_order(&order("BTC-USD", 1.0, 60_000.0));
    assert!(!btc_result.passed);
    assert!(btc_result.violations[0].contains("circuit breaker"));
}

#[test]
fn breaker_recovers_after_cooldown_and_probe_successes() {
    let mut config = RiskEngineConfig::default();
    config.breaker_cooldown_ms = 0;
    config.breaker_half_open_successes_required = 1;
    let engine = RiskEngine::new(&config);

    mark(&engine, "BTC-USD", 50_000.0);
    mark(&engine, "BTC-USD", 60_000.0);
    assert!(!engine.validate_order(&order("BTC-USD", 1.0, 60_000.0)).passed);

    engine.scan_breaker_cooldowns();
    assert_eq!(
        engine.breaker_state(&Symbol::from("BTC-USD")),
        risk_engine::circuit_breaker::BreakerState::HalfOpen
    );
}

#[test]
fn untouched_symbol_starts_closed() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());
    assert_eq!(
        engine.breaker_state(&Symbol::from("SOL-USD")),
        risk_engine::circuit_breaker::BreakerState::Closed
    );
}
