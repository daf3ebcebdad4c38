//! Alert monitor behavior as driven by the engine's event bus: a
//! rejected order should show up in `alert_monitor().recent(..)` once
//! the event is drained.

use risk_engine::evaluator::Order;
use risk_engine::limits::{new_limit, LimitType};
use risk_engine::monitor::AlertLevel;
use risk_engine::RiskEngineConfig;
use risk_engine::RiskEngine;
use common::{OrderType, Side, Symbol, UserId};
use std::time::Duration;

fn user(s: &str) -> UserId {
    UserId::from(s)
}
fn sym(s: &str) -> Symbol {
    Symbol::from(s)
}

#[test]
fn rejected_order_event_drains_into_a_critical_alert() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());
    engine
        .set_limit(new_limit(user("u1"), sym(""), LimitType::OrderSize, 1.0, None))
        .unwrap();

    let receiver = engine.subscribe_events();
    let monitor = engine.alert_monitor();

    let result = engine.validate_order(&Order {
        user_id: user("u1"),
        symbol: sym("BTC-USD"),
        side: Side::Buy,
        quantity: 100.0,
        price: 50_000.0,
        order_type: OrderType::Limit,
    });
    assert!(!result.passed);

    let event = receiver.recv_timeout(Duration::from_secs(1)).expect("event should be published");
    monitor.observe(&event);

    let recent = monitor.recent(10);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].level, AlertLevel::Critical);
    assert!(recent[0].message.contains("order rejected"));
}

#[test]
fn passing_order_publishes_no_alert() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());
    let monitor = engine.alert_monitor();

    let result = engine.validate_order(&Order {
        user_id: user("u1"),
        symbol: sym("BTC-USD"),
        side: Side::Buy,
        quantity: 1.0,
        price: 50_000.0,
        order_type: OrderType::Limit,
    });
    assert!(result.passed);
    assert!(monitor.recent(10).is_empty());
}
