//! Process-wide Prometheus counters, registered once at first use and
//! scraped by the metrics HTTP endpoint in `main`.

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram, register_int_gauge, CounterVec, Histogram, IntGauge};

lazy_static! {
    /// Pre-trade checks run, labeled by outcome (`passed`, `rejected`).
    pub static ref ORDERS_CHECKED: CounterVec = register_counter_vec!(
        "risk_engine_orders_checked_total",
        "Pre-trade checks run, by outcome",
        &["outcome"]
    )
    .expect("metric registration");

    /// Circuit breaker trips, labeled by symbol.
    pub static ref BREAKER_TRIPS: CounterVec = register_counter_vec!(
        "risk_engine_breaker_trips_total",
        "Circuit breaker trips, by symbol",
        &["symbol"]
    )
    .expect("metric registration");

    /// Events dropped by the event bus because it was full.
    pub static ref EVENTS_DROPPED: IntGauge = register_int_gauge!(
        "risk_engine_events_dropped",
        "Cumulative risk events dropped because the event bus was full"
    )
    .expect("metric registration");

    /// Wall-clock duration of one `pre_trade_check` call.
    pub static ref RISK_CHECK_LATENCY: Histogram = register_histogram!(
        "risk_check_latency_seconds",
        "Pre-trade check latency in seconds",
        vec![1e-6, 5e-6, 1e-5, 5e-5, 1e-4, 5e-4, 1e-3, 5e-3]
    )
    .expect("metric registration");
}

/// Record the outcome of one pre-trade check.
pub fn record_check(passed: bool) {
    let outcome = if passed { "passed" } else { "rejected" };
    ORDERS_CHECKED.with_label_values(&[outcome]).inc();
}

/// Record a circuit breaker trip for `symbol`.
pub fn record_breaker_trip(symbol: &str) {
    BREAKER_TRIPS.with_label_values(&[symbol]).inc();
}

/// Refresh the dropped-events gauge to `dropped`.
pub fn set_events_dropped(dropped: i64) {
    EVENTS_DROPPED.set(dropped);
}

/// Record one `pre_trade_check` call's wall-clock duration.
pub fn record_check_latency(duration: std::time::Duration) {
    RISK_CHECK_LATENCY.observe(duration.as_secs_f64());
}
