//! Engine configuration, loaded from an optional file plus environment
//! overrides.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the risk engine binary and its
/// component wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEngineConfig {
    /// Capacity of the market data ingress channel (C4).
    pub market_data_channel_capacity: usize,
    /// Capacity of the batch operation submission queue (C6).
    pub batch_channel_capacity: usize,
    /// Capacity of the event bus (C8).
    pub event_bus_capacity: usize,
    /// Default breaker trip threshold, as a fraction (`0.10` = 10%).
    pub breaker_price_change_threshold: f64,
    /// Default breaker cooldown, in milliseconds.
    pub breaker_cooldown_ms: i64,
    /// Consecutive probe successes required to close a `HalfOpen`
    /// breaker.
    pub breaker_half_open_successes_required: u32,
    /// Dollar ceiling on cumulative notional traded per user per day.
    pub max_daily_volume: f64,
    /// Fallback daily loss ceiling, used when a user has no
    /// `DailyLoss`-type limit configured.
    pub default_max_daily_loss: f64,
    /// Starting equity assigned to a user seen for the first time.
    pub default_account_equity: f64,
    /// Confidence level used by the VaR check.
    pub var_confidence_level: f64,
    /// Time horizon, in days, the VaR check scales volatility by.
    pub var_horizon_days: f64,
    /// Fallback annualized volatility for symbols with no configured
    /// volatility estimate.
    pub default_volatility: f64,
    /// Fraction of a hard limit at which a passing check still emits a
    /// warning.
    pub warning_fraction: f64,
    /// Port the Prometheus metrics endpoint listens on.
    pub metrics_port: u16,
    /// Order size ceiling used when no `OrderSize` limit is configured.
    pub max_order_size: f64,
    /// Position size ceiling used when no `Position` limit is
    /// configured.
    pub max_position_size: f64,
    /// Soft per-check latency budget, in microseconds. Breaches are
    /// logged but never change a check's result.
    pub max_latency_micros: u64,
    /// Master switch for the pre-trade ladder.
    pub enable_pre_trade_checks: bool,
    /// Master switch for post-trade accumulator updates.
    pub enable_post_trade_checks: bool,
    /// Master switch for the VaR rung.
    pub enable_var_calculation: bool,
    /// Master switch for the circuit breaker rung.
    pub enable_circuit_breaker: bool,
    /// Number of `RiskCheckResult`/`RiskEvent` entries the object pools
    /// pre-allocate.
    pub check_result_pool_size: usize,
    /// Number of events the event-pool pre-allocates.
    pub event_pool_size: usize,
    /// Number of queued batch operations that triggers an early flush.
    pub batch_flush_threshold: usize,
    /// Maximum time, in milliseconds, the batch pipeline waits before
    /// flushing a partial batch.
    pub batch_flush_interval_ms: u64,
}

impl Default for RiskEngineConfig {
    fn default() -> Self {
        Self {
            market_data_channel_capacity: 10_000,
            batch_channel_capacity: 1_000,
            event_bus_capacity: 10_000,
            breaker_price_change_threshold: 0.10,
            breaker_cooldown_ms: 300_000,
            breaker_half_open_successes_required: 3,
            max_daily_volume: f64::MAX,
            default_max_daily_loss: f64::MAX,
            default_account_equity: 1_000_000.0,
            var_confidence_level: 0.95,
            var_horizon_days: 1.0,
            default_volatility: 0.02,
            warning_fraction: 0.8,
            metrics_port: 9053,
            max_order_size: f64::MAX,
            max_position_size: f64::MAX,
            max_latency_micros: 10,
            enable_pre_trade_checks: true,
            enable_post_trade_checks: true,
            enable_var_calculation: true,
            enable_circuit_breaker: true,
            check_result_pool_size: 1_000,
            event_pool_size: 1_000,
            batch_flush_threshold: 100,
            batch_flush_interval_ms: 100,
        }
    }
}

impl RiskEngineConfig {
    /// Load configuration from (in increasing priority order) built-in
    /// defaults, an optional `config/risk-engine.toml`, and
    /// `RISK_ENGINE_*`-prefixed environment variables.
    ///
    /// # Errors
    /// Returns an error if a configuration source fails to parse, or if
    /// the merged result does not deserialize into
    /// [`RiskEngineConfig`].
    pub fn load() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("market_data_channel_capacity", defaults.market_data_channel_capacity as i64)?
            .set_default("batch_channel_capacity", defaults.batch_channel_capacity as i64)?
            .set_default("event_bus_capacity", defaults.event_bus_capacity as i64)?
            .set_default("breaker_price_change_threshold", defaults.breaker_price_change_threshold)?
            .set_default("breaker_cooldown_ms", defaults.breaker_cooldown_ms)?
            .set_default(
                "breaker_half_open_successes_required",
                i64::from(defaults.breaker_half_open_successes_required),
            )?
            .set_default("max_daily_volume", defaults.max_daily_volume)?
            .set_default("default_max_daily_loss", defaults.default_max_daily_loss)?
            .set_default("default_account_equity", defaults.default_account_equity)?
            .set_default("var_confidence_level", defaults.var_confidence_level)?
            .set_default("var_horizon_days", defaults.var_horizon_days)?
            .set_default("default_volatility", defaults.default_volatility)?
            .set_default("warning_fraction", defaults.warning_fraction)?
            .set_default("metrics_port", i64::from(defaults.metrics_port))?
            .set_default("max_order_size", defaults.max_order_size)?
            .set_default("max_position_size", defaults.max_position_size)?
            .set_default("max_latency_micros", defaults.max_latency_micros as i64)?
            .set_default("enable_pre_trade_checks", defaults.enable_pre_trade_checks)?
            .set_default("enable_post_trade_checks", defaults.enable_post_trade_checks)?
            .set_default("enable_var_calculation", defaults.enable_var_calculation)?
            .set_default("enable_circuit_breaker", defaults.enable_circuit_breaker)?
            .set_default("check_result_pool_size", defaults.check_result_pool_size as i64)?
            .set_default("event_pool_size", defaults.event_pool_size as i64)?
            .set_default("batch_flush_threshold", defaults.batch_flush_threshold as i64)?
            .set_default("batch_flush_interval_ms", defaults.batch_flush_interval_ms as i64)?
            .add_source(config::File::with_name("config/risk-engine").required(false))
            .add_source(config::Environment::with_prefix("RISK_ENGINE"));

        let merged = builder.build()?;
        Ok(merged.try_deserialize()?)
    }
}
