//! Risk limit CRUD and scope resolution through the engine's public API.

use risk_engine::limits::{new_limit, LimitType};
use risk_engine::RiskEngineConfig;
use risk_engine::RiskEngine;
use common::{Symbol, UserId};

fn user(s: &str) -> UserId {
    UserId::from(s)
}
fn sym(s: &str) -> Symbol {
    Symbol::from(s)
}

#[test]
fn set_limit_is_visible_via_get_limits() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());
    let stored = engine
        .set_limit(new_limit(user("u1"), sym(""), LimitType::OrderSize, 500.0, None))
        .unwrap();
    let limits = engine.get_limits(&user("u1"));
    assert_eq!(limits.len(), 1);
    assert_eq!(limits[0].id, stored.id);
}

#[test]
fn get_limits_merges_user_and_global_scopes() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());
    engine
        .set_limit(new_limit(user(""), sym(""), LimitType::DailyLoss, 10_000.0, None))
        .unwrap();
    engine
        .set_limit(new_limit(user("u1"), sym(""), LimitType::OrderSize, 500.0, None))
        .unwrap();
    let limits = engine.get_limits(&user("u1"));
    assert_eq!(limits.len(), 2);
}

#[test]
fn symbol_scoped_limit_is_returned_by_get_limits_for_symbol() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());
    engine
        .set_limit(new_limit(user(""), sym("BTC-USD"), LimitType::Position, 10.0, None))
        .unwrap();
    let limits = engine.get_limits_for_symbol(&sym("BTC-USD"));
    assert_eq!(limits.len(), 1);
    assert_eq!(limits[0].limit_type, LimitType::Position);
}

#[test]
fn update_limit_changes_threshold_in_place() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());
    let stored = engine
        .set_limit(new_limit(user("u1"), sym(""), LimitType::OrderSize, 500.0, None))
        .unwrap();
    let mut changed = stored.clone();
    changed.value = 750.0;
    let updated = engine.update_limit(changed).unwrap();
    assert_eq!(updated.id, stored.id);
    assert_eq!(engine.get_limits(&user("u1"))[0].value, 750.0);
}

#[test]
fn delete_limit_owned_by_someone_else_fails() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());
    let stored = engine
        .set_limit(new_limit(user("u1"), sym(""), LimitType::OrderSize, 500.0, None))
        .unwrap();
    assert!(engine.delete_limit(&user("u2"), stored.id).is_err());
    assert!(engine.delete_limit(&user("u1"), stored.id).is_ok());
    assert!(engine.get_limits(&user("u1")).is_empty());
}

#[test]
fn adding_a_limit_with_nonpositive_value_is_rejected() {
    let engine = RiskEngine::new(&RiskEngineConfig::default());
    let result = engine.set_limit(new_limit(user("u1"), sym(""), LimitType::OrderSize, 0.0, None));
    assert!(result.is_err());
}
