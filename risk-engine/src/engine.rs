//! Wires the eight components into one handle and exposes the engine's
//! public API. This is the only module most callers need to import.

use crate::batch::BatchPipeline;
use crate::circuit_breaker::{BreakerState, BreakerThresholds, CircuitBreakerTable};
use crate::config::RiskEngineConfig;
use crate::evaluator::{AccountSnapshot, EvaluatorConfig, Order, RiskCheckResult, RiskEvaluator, RiskLevel, StaticVolatilityProvider, VolatilityProvider};
use crate::event_bus::{EventBus, RiskEvent, RiskEventKind, Severity};
use crate::limits::{LimitId, LimitStore, LimitType, RiskLimit};
use crate::market_data::{MarkPriceTable, MarketDataProcessor, MarketDataUpdate};
use crate::monitor::AlertMonitor;
use crate::positions::{Position, PositionStore};
use common::{Price, RiskError, RiskResult, Symbol, Ts, UserId};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything `get_account_risk` reports for one user.
#[derive(Debug, Clone)]
pub struct AccountRisk {
    /// Every open position.
    pub positions: Vec<Position>,
    /// Sum of `|quantity| * mark_price` across all open positions.
    pub gross_exposure: f64,
    /// The account's daily accumulators and equity.
    pub account: AccountSnapshot,
    /// `equity + gross_exposure`: a rough account-level total value.
    pub total_value: f64,
    /// Equity not currently backing an open position.
    pub available_margin: f64,
    /// Equity backing open positions (`gross_exposure`, clamped to
    /// equity).
    pub used_margin: f64,
    /// `equity / used_margin`, or `f64::MAX` when nothing is in use.
    pub margin_level: f64,
    /// Net realized P&L today, signed.
    pub daily_pnl: f64,
    /// Net realized P&L today plus unrealized P&L on open positions.
    pub total_pnl: f64,
}

/// The three-level severity a gateway-facing caller sees, collapsing
/// the evaluator's internal `High`/`Critical` distinction (the gateway
/// does not need to know which rung rejected an order, only how
/// serious it was).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayRiskLevel {
    /// Passed with no warnings.
    Low,
    /// Passed with warnings.
    Medium,
    /// Failed, at any severity.
    High,
}

impl From<RiskLevel> for GatewayRiskLevel {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => Self::Low,
            RiskLevel::Medium => Self::Medium,
            RiskLevel::High | RiskLevel::Critical => Self::High,
        }
    }
}

/// Margin and severity figures a trading gateway needs alongside the
/// plain pass/fail outcome.
#[derive(Debug, Clone, Copy)]
pub struct RiskMetrics {
    /// Margin this order would consume if filled (`order_value` at the
    /// evaluated price).
    pub required_margin: f64,
    /// `available_margin` after this order, assuming it fills.
    pub available_margin_after: f64,
    /// `margin_level` after this order, assuming it fills.
    pub margin_level_after: f64,
    /// The gateway-facing severity.
    pub risk_level: GatewayRiskLevel,
    /// Whether the gateway should let this order proceed.
    pub is_allowed: bool,
}

/// The gateway-facing shape of a pre-trade check: a plain boolean,
/// an optional human-readable reason, and the margin figures a
/// gateway needs to update its own book.
#[derive(Debug, Clone)]
pub struct OrderValidation {
    /// Whether the order is allowed to proceed.
    pub is_valid: bool,
    /// The first violation, if rejected.
    pub rejection_reason: Option<String>,
    /// Margin and severity figures.
    pub risk_metrics: RiskMetrics,
}

/// The real-time pre-trade risk engine: the single aggregate a caller
/// constructs and holds for the lifetime of the process.
pub struct RiskEngine {
    limits: Arc<LimitStore>,
    positions: Arc<PositionStore>,
    breakers: Arc<CircuitBreakerTable>,
    marks: MarkPriceTable,
    events: Arc<EventBus>,
    batch: Arc<BatchPipeline>,
    evaluator: Arc<RiskEvaluator>,
    monitor: Arc<AlertMonitor>,
    market_data: MarketDataProcessor,
    market_data_tx: Sender<MarketDataUpdate>,
    market_data_rx: Receiver<MarketDataUpdate>,
}

impl RiskEngine {
    /// Build every component from `config`, with a flat default
    /// volatility surface until a real one is supplied via
    /// [`RiskEngine::with_volatility_provider`].
    #[must_use]
    pub fn new(config: &RiskEngineConfig) -> Self {
        let volatility = Arc::new(StaticVolatilityProvider::new(FxHashMap::default(), config.default_volatility));
        Self::with_volatility_provider(config, volatility)
    }

    /// Build every component from `config`, using `volatility` for the
    /// VaR check instead of the flat default.
    #[must_use]
    pub fn with_volatility_provider(config: &RiskEngineConfig, volatility: Arc<dyn VolatilityProvider>) -> Self {
        let limits = Arc::new(LimitStore::new());
        let positions = Arc::new(PositionStore::new());
        let breakers = Arc::new(CircuitBreakerTable::new(BreakerThresholds {
            price_change_threshold: config.breaker_price_change_threshold,
            cooldown_ms: config.breaker_cooldown_ms,
            half_open_successes_required: config.breaker_half_open_successes_required,
        }));
        let marks = MarkPriceTable::new();
        let events = Arc::new(EventBus::new(config.event_bus_capacity));
        let batch = Arc::new(BatchPipeline::with_flush_tuning(
            config.batch_channel_capacity,
            config.batch_flush_threshold,
            Duration::from_millis(config.batch_flush_interval_ms),
        ));
        let monitor = Arc::new(AlertMonitor::new());

        let evaluator_config = EvaluatorConfig {
            max_daily_volume: config.max_daily_volume,
            default_max_daily_loss: config.default_max_daily_loss,
            default_account_equity: config.default_account_equity,
            var_confidence_level: config.var_confidence_level,
            var_horizon_days: config.var_horizon_days,
            default_volatility: config.default_volatility,
            warning_fraction: config.warning_fraction,
            max_order_size: config.max_order_size,
            max_position_size: config.max_position_size,
            max_latency_micros: config.max_latency_micros,
            enable_pre_trade_checks: config.enable_pre_trade_checks,
            enable_post_trade_checks: config.enable_post_trade_checks,
            enable_var_calculation: config.enable_var_calculation,
            enable_circuit_breaker: config.enable_circuit_breaker,
        };
        let evaluator = Arc::new(RiskEvaluator::new(
            limits.clone(),
            positions.clone(),
            breakers.clone(),
            marks.clone(),
            volatility,
            evaluator_config,
        ));
        let market_data = MarketDataProcessor::new(marks.clone(), positions.clone(), breakers.clone(), events.clone());
        let (market_data_tx, market_data_rx) = channel::bounded(config.market_data_channel_capacity);

        Self {
            limits,
            positions,
            breakers,
            marks,
            events,
            batch,
            evaluator,
            monitor,
            market_data,
            market_data_tx,
            market_data_rx,
        }
    }

    /// Run the full pre-trade ladder against `order`, publishing an
    /// event for a rejection and returning the result directly; never
    /// blocks on the batch pipeline or the event bus.
    #[must_use]
    pub fn validate_order(&self, order: &Order) -> RiskCheckResult {
        let result = self.evaluator.pre_trade_check(order);
        crate::metrics::record_check(result.passed);
        if !result.passed {
            let reason = result.violations.join("; ");
            self.events.publish(RiskEvent::new(
                Severity::Critical,
                RiskEventKind::OrderRejected {
                    user_id: order.user_id.clone(),
                    symbol: order.symbol.clone(),
                    reason,
                },
            ));
        }
        result
    }

    /// Record a filled order's realized P&L impact on the evaluator's
    /// daily accumulators, after the fill has already been applied to
    /// [`PositionStore`] (typically via the batch pipeline).
    pub fn post_trade_check(&self, order: &Order, realized_pnl_delta: f64) {
        self.evaluator.post_trade_check(order, realized_pnl_delta);
    }

    /// All open positions for `user_id`.
    #[must_use]
    pub fn get_positions(&self, user_id: &UserId) -> Vec<Position> {
        self.positions.list_for_user(user_id)
    }

    /// Every limit that could apply to `user_id`: their own, plus any
    /// global limits.
    #[must_use]
    pub fn get_limits(&self, user_id: &UserId) -> Vec<RiskLimit> {
        let mut limits = self.limits.get_for_user(user_id);
        limits.extend(self.limits.get_global());
        limits
    }

    /// Every limit scoped to `symbol` (not user-specific).
    #[must_use]
    pub fn get_limits_for_symbol(&self, symbol: &Symbol) -> Vec<RiskLimit> {
        self.limits.get_for_symbol(symbol)
    }

    /// Insert a new limit (`limit.id` is ignored and reassigned).
    ///
    /// # Errors
    /// See [`LimitStore::add`].
    pub fn set_limit(&self, limit: RiskLimit) -> RiskResult<RiskLimit> {
        let limit_type = limit.limit_type;
        let stored = self.limits.add(limit)?;
        info!(?limit_type, user_id = %stored.user_id, "risk limit added");
        Ok(stored)
    }

    /// Replace an existing limit's mutable fields.
    ///
    /// # Errors
    /// See [`LimitStore::update`].
    pub fn update_limit(&self, limit: RiskLimit) -> RiskResult<RiskLimit> {
        self.limits.update(limit)
    }

    /// Remove a limit owned by `user_id`.
    ///
    /// # Errors
    /// See [`LimitStore::delete`].
    pub fn delete_limit(&self, user_id: &UserId, limit_id: LimitId) -> RiskResult<()> {
        self.limits.delete(user_id, limit_id)
    }

    /// A combined view of `user_id`'s positions, gross exposure, and
    /// daily accumulators.
    #[must_use]
    pub fn get_account_risk(&self, user_id: &UserId) -> AccountRisk {
        let positions = self.positions.list_for_user(user_id);
        let gross_exposure = self.positions.gross_exposure(user_id);
        let account = self.evaluator.account_snapshot(user_id);

        let used_margin = gross_exposure.min(account.equity.max(0.0));
        let available_margin = (account.equity - used_margin).max(0.0);
        let margin_level = if used_margin > 0.0 { account.equity / used_margin } else { f64::MAX };
        let unrealized_pnl: f64 = positions.iter().map(|p| p.unrealized_pnl).sum();

        AccountRisk {
            positions,
            gross_exposure,
            total_value: account.equity + gross_exposure,
            available_margin,
            used_margin,
            margin_level,
            daily_pnl: account.daily_realized_pnl,
            total_pnl: account.daily_realized_pnl + unrealized_pnl,
            account,
        }
    }

    /// Validate and enqueue a market data tick without blocking.
    /// Rejects an empty symbol or non-positive price as
    /// [`RiskError::InvalidArgument`] before it ever reaches the
    /// queue. A worker thread calling [`Self::run_market_data_worker`]
    /// (or a test draining [`Self::market_data_receiver`]) applies it
    /// via [`Self::process_market_data`].
    ///
    /// # Errors
    /// [`RiskError::InvalidArgument`] for a malformed tick,
    /// [`RiskError::ChannelFull`] if the ingress queue is saturated,
    /// [`RiskError::Internal`] if the worker side has disconnected.
    pub fn update_market_data(&self, symbol: Symbol, price: Price) -> RiskResult<()> {
        if symbol.is_empty() {
            return Err(RiskError::InvalidArgument("market data symbol must not be empty".to_string()));
        }
        if price.0 <= 0.0 {
            return Err(RiskError::InvalidArgument(format!("market data price {} must be positive", price.0)));
        }
        let update = MarketDataUpdate {
            symbol,
            price,
            timestamp: Ts::now(),
        };
        self.market_data_tx.try_send(update).map_err(|err| match err {
            TrySendError::Full(_) => RiskError::ChannelFull("market data ingress".to_string()),
            TrySendError::Disconnected(_) => RiskError::Internal("market data worker gone".to_string()),
        })
    }

    /// Apply one already-validated tick synchronously: updates the mark
    /// table, every affected position's unrealized P&L, and probes the
    /// symbol's circuit breaker. Returns the number of positions marked.
    pub fn process_market_data(&self, update: &MarketDataUpdate) -> usize {
        self.market_data.process(update)
    }

    /// The receiving half of the market data ingress queue, for a
    /// dedicated worker thread or a test that wants to drain
    /// deterministically instead of spawning [`Self::run_market_data_worker`].
    #[must_use]
    pub fn market_data_receiver(&self) -> Receiver<MarketDataUpdate> {
        self.market_data_rx.clone()
    }

    /// Drain the market data queue until it disconnects, applying each
    /// tick via [`Self::process_market_data`]. Intended for a dedicated
    /// worker thread; blocks the calling thread.
    pub fn run_market_data_worker(&self) {
        while let Ok(update) = self.market_data_rx.recv() {
            self.process_market_data(&update);
        }
    }

    /// Run the pre-trade ladder and report the result in the
    /// margin-and-severity shape a trading gateway needs, without going
    /// through [`Self::validate_order`]'s event-publishing path.
    #[must_use]
    pub fn validate_order_for_gateway(&self, order: &Order) -> OrderValidation {
        let result = self.evaluator.pre_trade_check(order);
        let account = self.evaluator.account_snapshot(&order.user_id);
        let gross_exposure = self.positions.gross_exposure(&order.user_id);

        let required_margin = order.quantity * order.price;
        let used_margin_after = (gross_exposure + required_margin).min(account.equity.max(0.0));
        let available_margin_after = (account.equity - used_margin_after).max(0.0);
        let margin_level_after = if used_margin_after > 0.0 {
            account.equity / used_margin_after
        } else {
            f64::MAX
        };

        OrderValidation {
            is_valid: result.passed,
            rejection_reason: result.violations.first().cloned(),
            risk_metrics: RiskMetrics {
                required_margin,
                available_margin_after,
                margin_level_after,
                risk_level: result.risk_level.into(),
                is_allowed: result.passed,
            },
        }
    }

    /// The current circuit breaker state for `symbol`.
    #[must_use]
    pub fn breaker_state(&self, symbol: &Symbol) -> BreakerState {
        self.breakers.state(symbol)
    }

    /// Advance any `Open` breaker whose cooldown elapsed to
    /// `HalfOpen`. Intended to be called roughly once a second by a
    /// scanner task.
    pub fn scan_breaker_cooldowns(&self) {
        self.breakers.scan_cooldowns();
    }

    /// Zero every user's daily accumulators (volume, loss, order
    /// count). Intended to run once per trading day.
    pub fn reset_daily_metrics(&self) {
        self.evaluator.reset_daily_metrics();
    }

    /// The shared batch pipeline, for a caller that wants to submit
    /// [`crate::batch::RiskOperation`]s directly (e.g. a trade ingress
    /// worker).
    #[must_use]
    pub fn batch_pipeline(&self) -> Arc<BatchPipeline> {
        self.batch.clone()
    }

    /// The shared evaluator, for a worker (e.g. the batch pipeline
    /// drain loop) that needs to run `RiskOperation::CheckLimit`
    /// entries itself.
    #[must_use]
    pub fn evaluator(&self) -> Arc<RiskEvaluator> {
        self.evaluator.clone()
    }

    /// The shared event bus receiver, for a consumer that wants to feed
    /// events into the alert monitor or external observability.
    #[must_use]
    pub fn subscribe_events(&self) -> crossbeam::channel::Receiver<RiskEvent> {
        self.events.receiver()
    }

    /// The shared alert monitor, fed by draining [`Self::subscribe_events`].
    #[must_use]
    pub fn alert_monitor(&self) -> Arc<AlertMonitor> {
        self.monitor.clone()
    }

    /// Cumulative risk events dropped because the event bus was full.
    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.events.dropped_count()
    }

    /// The shared limit store, positions, and breaker table, for a
    /// worker thread (e.g. the batch pipeline drain loop) that needs
    /// direct access rather than going through `RiskEngine`'s methods.
    #[must_use]
    pub fn shared_stores(&self) -> (Arc<PositionStore>, Arc<LimitStore>) {
        (self.positions.clone(), self.limits.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::new_limit;
    use common::{OrderType, Side};

    fn engine() -> RiskEngine {
        RiskEngine::new(&RiskEngineConfig::default())
    }

    #[test]
    fn validate_order_publishes_event_on_rejection() {
        let engine = engine();
        let rx = engine.subscribe_events();
        engine
            .set_limit(new_limit(UserId::from("u1"), Symbol::from(""), LimitType::OrderSize, 1.0, None))
            .unwrap();
        let order = Order {
            user_id: UserId::from("u1"),
            symbol: Symbol::from("BTC-USD"),
            side: Side::Buy,
            quantity: 100.0,
            price: 50_000.0,
            order_type: OrderType::Limit,
        };
        let result = engine.validate_order(&order);
        assert!(!result.passed);
        let event = rx.try_recv().unwrap();
        assert!(matches!(event.kind, RiskEventKind::OrderRejected { .. }));
    }

    #[test]
    fn get_account_risk_reflects_positions_and_market_data() {
        let engine = engine();
        let (positions, _limits) = engine.shared_stores();
        positions.apply_trade(&UserId::from("u1"), &Symbol::from("BTC-USD"), 1.0, 50_000.0);
        engine.update_market_data(Symbol::from("BTC-USD"), common::Price(52_000.0)).unwrap();
        let update = engine.market_data_receiver().recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        engine.process_market_data(&update);
        let risk = engine.get_account_risk(&UserId::from("u1"));
        assert_eq!(risk.positions.len(), 1);
        assert!((risk.gross_exposure - 52_000.0).abs() < 1e-6);
    }

    #[test]
    fn update_market_data_rejects_invalid_tick() {
        let engine = engine();
        assert!(engine.update_market_data(Symbol::from(""), common::Price(100.0)).is_err());
        assert!(engine.update_market_data(Symbol::from("BTC-USD"), common::Price(0.0)).is_err());
    }

    #[test]
    fn validate_order_for_gateway_collapses_to_three_levels() {
        let engine = engine();
        engine
            .set_limit(new_limit(UserId::from("u1"), Symbol::from(""), LimitType::OrderSize, 1.0, None))
            .unwrap();
        let order = Order {
            user_id: UserId::from("u1"),
            symbol: Symbol::from("BTC-USD"),
            side: Side::Buy,
            quantity: 100.0,
            price: 50_000.0,
            order_type: OrderType::Limit,
        };
        let validation = engine.validate_order_for_gateway(&order);
        assert!(!validation.is_valid);
        assert!(validation.rejection_reason.is_some());
        assert_eq!(validation.risk_metrics.risk_level, GatewayRiskLevel::High);
        assert!(!validation.risk_metrics.is_allowed);
    }

    #[test]
    fn set_and_delete_limit_round_trip() {
        let engine = engine();
        let stored = engine
            .set_limit(new_limit(UserId::from("u1"), Symbol::from(""), LimitType::OrderSize, 500.0, None))
            .unwrap();
        assert_eq!(engine.get_limits(&UserId::from("u1")).len(), 1);
        engine.delete_limit(&UserId::from("u1"), stored.id).unwrap();
        assert!(engine.get_limits(&UserId::from("u1")).is_empty());
    }
}
