//! The pre-trade risk evaluator: a fixed ladder of synchronous checks
//! that must return well inside the configured latency budget. Nothing
//! here blocks: no channel recv, no network call, no lock held longer
//! than a single read or write of one component's own state.

use crate::circuit_breaker::CircuitBreakerTable;
use crate::limits::{LimitStore, LimitType};
use crate::market_data::MarkPriceTable;
use crate::positions::PositionStore;
use common::{OrderType, Side, Symbol, UserId};
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A prospective order submitted for a pre-trade check.
#[derive(Debug, Clone)]
pub struct Order {
    /// The submitting user.
    pub user_id: UserId,
    /// The instrument.
    pub symbol: Symbol,
    /// Buy or sell.
    pub side: Side,
    /// Must be `> 0`; the evaluator does not infer sign from `side`.
    pub quantity: f64,
    /// Must be `> 0`.
    pub price: f64,
    /// Carried through for completeness; does not change the ladder.
    pub order_type: OrderType,
}

/// Overall severity of a [`RiskCheckResult`].
///
/// Ordered so that `Low < Medium < High < Critical`. A passed check
/// reports `Low`/`Medium`/`High` purely from its warning count; a
/// failed check always reports `High` or `Critical`, never `Medium`,
/// so that "failed implies at least High" holds regardless of which
/// rung rejected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Passed with no warnings.
    Low,
    /// Passed, with one or two soft-threshold warnings.
    Medium,
    /// Passed with three or more warnings, or failed on a rung rated
    /// `High` (order size, daily activity, position, concentration,
    /// VaR, leverage).
    High,
    /// Failed on the `Critical`-rated rung (circuit breaker).
    Critical,
}

/// The outcome of running the ladder against one [`Order`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheckResult {
    /// `true` only if every check in the ladder passed.
    pub passed: bool,
    /// The most severe level reached.
    pub risk_level: RiskLevel,
    /// Reasons a check failed. Empty when `passed` is `true`.
    pub violations: Vec<String>,
    /// Soft-threshold warnings. Can be non-empty even when `passed` is
    /// `true`.
    pub warnings: Vec<String>,
}

impl RiskCheckResult {
    fn pass() -> Self {
        Self {
            passed: true,
            risk_level: RiskLevel::Low,
            violations: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Reject with `level`, which must be `High` or `Critical`: a
    /// failed check never reports `Low`/`Medium`.
    fn reject(reason: String, level: RiskLevel) -> Self {
        Self {
            passed: false,
            risk_level: level,
            violations: vec![reason],
            warnings: Vec::new(),
        }
    }

    /// Add a soft-threshold warning and recompute `risk_level` from the
    /// accumulated warning count (`Low` for zero, `Medium` for one or
    /// two, `High` for three or more).
    fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
        self.risk_level = match self.warnings.len() {
            0 => RiskLevel::Low,
            1 | 2 => RiskLevel::Medium,
            _ => RiskLevel::High,
        };
    }
}

/// Supplies a volatility estimate per symbol for the parametric VaR
/// check. The evaluator does not compute volatility itself: that is
/// an estimation problem for a market-data/analytics component to own.
pub trait VolatilityProvider: Send + Sync {
    /// Annualized (or otherwise normalized, as long as it is used
    /// consistently with the configured time horizon) volatility for
    /// `symbol`.
    fn volatility(&self, symbol: &Symbol) -> f64;
}

/// A volatility table with a fallback for unlisted symbols. Until a
/// real volatility surface is wired in, every symbol uses the fallback.
pub struct StaticVolatilityProvider {
    by_symbol: FxHashMap<Symbol, f64>,
    fallback: f64,
}

impl StaticVolatilityProvider {
    /// A provider returning `fallback` for any symbol not present in
    /// `by_symbol`.
    #[must_use]
    pub fn new(by_symbol: FxHashMap<Symbol, f64>, fallback: f64) -> Self {
        Self { by_symbol, fallback }
    }
}

impl VolatilityProvider for StaticVolatilityProvider {
    fn volatility(&self, symbol: &Symbol) -> f64 {
        self.by_symbol.get(symbol).copied().unwrap_or(self.fallback)
    }
}

/// A point-in-time view of a user's daily accumulators and equity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Cumulative notional traded today.
    pub daily_volume: f64,
    /// Cumulative realized loss today (positive number).
    pub daily_loss: f64,
    /// Orders submitted today.
    pub orders_today: u32,
    /// Current equity.
    pub equity: f64,
    /// Net realized P&L today, signed (negative when the day is a net
    /// loss so far).
    pub daily_realized_pnl: f64,
}

/// Per-user accumulators reset once a day: traded notional, realized
/// loss, order count, and the equity denominator used by the leverage
/// check.
struct AccountState {
    daily_volume: f64,
    daily_loss: f64,
    orders_today: u32,
    equity: f64,
    daily_realized_pnl: f64,
}

/// Holds one [`AccountState`] per user.
struct AccountTable {
    accounts: DashMap<UserId, Mutex<AccountState>>,
    default_equity: f64,
}

impl AccountTable {
    fn new(default_equity: f64) -> Self {
        Self {
            accounts: DashMap::new(),
            default_equity,
        }
    }

    fn with<R>(&self, user_id: &UserId, f: impl FnOnce(&mut AccountState) -> R) -> R {
        let entry = self.accounts.entry(user_id.clone()).or_insert_with(|| {
            Mutex::new(AccountState {
                daily_volume: 0.0,
                daily_loss: 0.0,
                orders_today: 0,
                equity: self.default_equity,
                daily_realized_pnl: 0.0,
            })
        });
        let mut state = entry.lock();
        f(&mut state)
    }

    fn reset_all(&self) {
        for entry in &self.accounts {
            let mut state = entry.value().lock();
            state.daily_volume = 0.0;
            state.daily_loss = 0.0;
            state.orders_today = 0;
            state.daily_realized_pnl = 0.0;
        }
    }
}

/// Z-scores for the one-sided confidence levels the VaR check
/// recognizes; anything else falls back to `1.0` (roughly a one
/// standard deviation move).
fn confidence_z(confidence_level: f64) -> f64 {
    if (confidence_level - 0.99).abs() < 1e-9 {
        2.33
    } else if (confidence_level - 0.95).abs() < 1e-9 {
        1.65
    } else if (confidence_level - 0.90).abs() < 1e-9 {
        1.28
    } else {
        1.0
    }
}

/// Tunables for the evaluator ladder, all with conservative defaults
/// that effectively disable a check when its corresponding limit has
/// not been configured.
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorConfig {
    /// Dollar ceiling on cumulative notional traded per user per day,
    /// used only when no `DailyLoss`-scoped limit narrows it further.
    pub max_daily_volume: f64,
    /// Fallback daily loss ceiling used when no [`LimitType::DailyLoss`]
    /// limit is configured for the user.
    pub default_max_daily_loss: f64,
    /// Starting equity assigned to a user seen for the first time.
    pub default_account_equity: f64,
    /// Confidence level used by the VaR check (`0.90`, `0.95`, or
    /// `0.99`; anything else uses a `1.0` z-score).
    pub var_confidence_level: f64,
    /// Time horizon, in days, the VaR check scales volatility by
    /// (`sqrt(horizon_days)`).
    pub var_horizon_days: f64,
    /// Fallback annualized volatility used when no
    /// [`VolatilityProvider`] entry exists for a symbol.
    pub default_volatility: f64,
    /// Fraction of a hard limit at which a passing check still emits a
    /// warning (e.g. `0.8` warns at 80% of the limit).
    pub warning_fraction: f64,
    /// Order size ceiling applied when no [`LimitType::OrderSize`] limit
    /// is configured for the user or symbol.
    pub max_order_size: f64,
    /// Position size ceiling applied when no [`LimitType::Position`]
    /// limit is configured for the user or symbol.
    pub max_position_size: f64,
    /// Soft latency budget for one [`RiskEvaluator::pre_trade_check`]
    /// call. Breaches are logged but never change the returned result.
    pub max_latency_micros: u64,
    /// Master switch for the pre-trade ladder. When `false`,
    /// `pre_trade_check` always passes without running any rung.
    pub enable_pre_trade_checks: bool,
    /// Master switch for `post_trade_check`'s accumulator updates.
    pub enable_post_trade_checks: bool,
    /// Master switch for the VaR rung specifically.
    pub enable_var_calculation: bool,
    /// Master switch for the circuit breaker rung specifically.
    pub enable_circuit_breaker: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_daily_volume: f64::MAX,
            default_max_daily_loss: f64::MAX,
            default_account_equity: 1_000_000.0,
            var_confidence_level: 0.95,
            var_horizon_days: 1.0,
            default_volatility: 0.02,
            warning_fraction: 0.8,
            max_order_size: f64::MAX,
            max_position_size: f64::MAX,
            max_latency_micros: 10,
            enable_pre_trade_checks: true,
            enable_post_trade_checks: true,
            enable_var_calculation: true,
            enable_circuit_breaker: true,
        }
    }
}

/// Runs the full pre-trade and post-trade ladder against the shared
/// limit, position, breaker, and mark-price components.
pub struct RiskEvaluator {
    limits: Arc<LimitStore>,
    positions: Arc<PositionStore>,
    breakers: Arc<CircuitBreakerTable>,
    marks: MarkPriceTable,
    accounts: AccountTable,
    volatility: Arc<dyn VolatilityProvider>,
    config: EvaluatorConfig,
}

impl RiskEvaluator {
    /// Wire an evaluator against the engine's shared components.
    #[must_use]
    pub fn new(
        limits: Arc<LimitStore>,
        positions: Arc<PositionStore>,
        breakers: Arc<CircuitBreakerTable>,
        marks: MarkPriceTable,
        volatility: Arc<dyn VolatilityProvider>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            limits,
            positions,
            breakers,
            marks,
            accounts: AccountTable::new(config.default_account_equity),
            volatility,
            config,
        }
    }

    /// Run every check in the ladder against `order`, short-circuiting
    /// on the first hard failure.
    #[must_use]
    pub fn pre_trade_check(&self, order: &Order) -> RiskCheckResult {
        let start = std::time::Instant::now();
        let result = self.run_pre_trade_ladder(order);

        let elapsed = start.elapsed();
        crate::metrics::record_check_latency(elapsed);
        if elapsed.as_micros() as u64 > self.config.max_latency_micros {
            tracing::warn!(
                user_id = %order.user_id,
                symbol = %order.symbol,
                elapsed_micros = elapsed.as_micros() as u64,
                budget_micros = self.config.max_latency_micros,
                "pre-trade check exceeded its latency budget"
            );
        }
        result
    }

    fn run_pre_trade_ladder(&self, order: &Order) -> RiskCheckResult {
        if !self.config.enable_pre_trade_checks {
            return RiskCheckResult::pass();
        }

        if order.user_id.is_empty() || order.symbol.is_empty() || order.quantity <= 0.0 || order.price <= 0.0 {
            return RiskCheckResult::reject(
                "invalid order: user, symbol, quantity, and price must be set and positive".to_string(),
                RiskLevel::High,
            );
        }

        if self.config.enable_circuit_breaker && self.breakers.is_blocking(&order.symbol) {
            return RiskCheckResult::reject(format!("circuit breaker active for {}", order.symbol), RiskLevel::Critical);
        }

        let order_value = order.quantity * order.price;
        let mut result = RiskCheckResult::pass();

        if let Some(check) = self.check_order_size(order) {
            return check;
        }
        if let Some(check) = self.check_daily_activity(order, order_value) {
            return check;
        }
        let new_quantity = match self.check_position_limit(order) {
            Ok(q) => q,
            Err(check) => return check,
        };
        if let Some(check) = self.check_concentration(order, new_quantity, order_value) {
            return check;
        }
        if self.config.enable_var_calculation {
            if let Some(check) = self.check_var(order, order_value) {
                return check;
            }
        }
        if let Some(check) = self.check_leverage(order, order_value) {
            return check;
        }

        self.apply_warnings(order, new_quantity, order_value, &mut result);
        result
    }

    /// Record a fill against the evaluator's own daily accumulators
    /// (volume, realized loss, equity) after [`PositionStore`] has
    /// already applied the trade. `realized_pnl_delta` is the change in
    /// realized P&L this fill produced (negative for a loss).
    pub fn post_trade_check(&self, order: &Order, realized_pnl_delta: f64) {
        if !self.config.enable_post_trade_checks {
            return;
        }
        let notional = order.quantity * order.price;
        self.accounts.with(&order.user_id, |account| {
            account.daily_volume += notional;
            account.orders_today += 1;
            account.equity += realized_pnl_delta;
            account.daily_realized_pnl += realized_pnl_delta;
            if realized_pnl_delta < 0.0 {
                account.daily_loss += -realized_pnl_delta;
            }
        });
    }

    /// Zero every user's daily accumulators. Intended to be called once
    /// per trading day.
    pub fn reset_daily_metrics(&self) {
        self.accounts.reset_all();
    }

    /// Seed or overwrite a user's equity, e.g. after a deposit or
    /// withdrawal recorded outside the trading path.
    pub fn set_equity(&self, user_id: &UserId, equity: f64) {
        self.accounts.with(user_id, |account| account.equity = equity);
    }

    /// A point-in-time snapshot of a user's daily accumulators and
    /// equity, for `get_account_risk`.
    #[must_use]
    pub fn account_snapshot(&self, user_id: &UserId) -> AccountSnapshot {
        self.accounts.with(user_id, |account| AccountSnapshot {
            daily_volume: account.daily_volume,
            daily_loss: account.daily_loss,
            orders_today: account.orders_today,
            equity: account.equity,
            daily_realized_pnl: account.daily_realized_pnl,
        })
    }

    fn check_order_size(&self, order: &Order) -> Option<RiskCheckResult> {
        let limit = self
            .limits
            .resolve_threshold(&order.user_id, &order.symbol, LimitType::OrderSize)
            .map_or(self.config.max_order_size, |l| l.value);
        if order.quantity > limit {
            return Some(RiskCheckResult::reject(
                format!("Order size {:.2} exceeds limit {:.2}", order.quantity, limit),
                RiskLevel::High,
            ));
        }
        None
    }

    fn check_daily_activity(&self, order: &Order, order_value: f64) -> Option<RiskCheckResult> {
        let loss_limit = self
            .limits
            .resolve_threshold(&order.user_id, &order.symbol, LimitType::DailyLoss)
            .map_or(self.config.default_max_daily_loss, |l| l.value);

        let (current_volume, current_loss) = self
            .accounts
            .with(&order.user_id, |a| (a.daily_volume, a.daily_loss));

        if current_volume + order_value > self.config.max_daily_volume {
            return Some(RiskCheckResult::reject(
                format!(
                    "Daily volume {:.2} would exceed limit {:.2}",
                    current_volume + order_value,
                    self.config.max_daily_volume
                ),
                RiskLevel::High,
            ));
        }

        // A coarse shock estimate: assume up to 1% of this order's
        // notional could itself become realized loss today.
        let potential_loss = order_value * 0.01;
        if current_loss + potential_loss > loss_limit {
            return Some(RiskCheckResult::reject(
                format!(
                    "Daily loss {:.2} would exceed limit {:.2}",
                    current_loss + potential_loss,
                    loss_limit
                ),
                RiskLevel::High,
            ));
        }
        None
    }

    fn check_position_limit(&self, order: &Order) -> Result<f64, RiskCheckResult> {
        let current = self.positions.get(&order.user_id, &order.symbol);
        let new_quantity = current.quantity + order.side.sign() * order.quantity;

        let limit = self
            .limits
            .resolve_threshold(&order.user_id, &order.symbol, LimitType::Position)
            .map_or(self.config.max_position_size, |l| l.value);
        if new_quantity.abs() > limit {
            return Err(RiskCheckResult::reject(
                format!("Position size {:.2} would exceed limit {:.2}", new_quantity.abs(), limit),
                RiskLevel::High,
            ));
        }
        Ok(new_quantity)
    }

    fn check_concentration(&self, order: &Order, new_quantity: f64, order_value: f64) -> Option<RiskCheckResult> {
        let limit = self
            .limits
            .resolve_threshold(&order.user_id, &order.symbol, LimitType::Concentration)?;

        let mark = self.effective_mark(&order.symbol, order.price);
        let new_symbol_value = new_quantity.abs() * mark;
        let portfolio_value = self.positions.gross_exposure(&order.user_id) + order_value;
        if portfolio_value <= 0.0 {
            return None;
        }
        let concentration = new_symbol_value / portfolio_value;
        if concentration > limit.value {
            return Some(RiskCheckResult::reject(
                format!(
                    "Concentration {:.4} would exceed limit {:.4} for {}",
                    concentration, limit.value, order.symbol
                ),
                RiskLevel::High,
            ));
        }
        None
    }

    fn check_var(&self, order: &Order, order_value: f64) -> Option<RiskCheckResult> {
        let limit = self
            .limits
            .resolve_threshold(&order.user_id, &order.symbol, LimitType::VaR)?;

        let volatility = self.volatility.volatility(&order.symbol);
        let z = confidence_z(self.config.var_confidence_level);
        let value_at_risk = order_value * volatility * z * self.config.var_horizon_days.sqrt();
        if value_at_risk > limit.value {
            return Some(RiskCheckResult::reject(
                format!("Value at risk {:.2} would exceed limit {:.2}", value_at_risk, limit.value),
                RiskLevel::High,
            ));
        }
        None
    }

    fn check_leverage(&self, order: &Order, order_value: f64) -> Option<RiskCheckResult> {
        let limit = self
            .limits
            .resolve_threshold(&order.user_id, &order.symbol, LimitType::Leverage)?;

        let equity = self.accounts.with(&order.user_id, |a| a.equity);
        if equity <= 0.0 {
            return Some(RiskCheckResult::reject(
                format!("account equity {equity:.2} is non-positive; leverage is undefined"),
                RiskLevel::High,
            ));
        }
        let gross_exposure = self.positions.gross_exposure(&order.user_id) + order_value;
        let leverage = gross_exposure / equity;
        if leverage > limit.value {
            return Some(RiskCheckResult::reject(
                format!("Leverage {:.2}x would exceed limit {:.2}x", leverage, limit.value),
                RiskLevel::High,
            ));
        }
        None
    }

    fn apply_warnings(&self, order: &Order, new_quantity: f64, order_value: f64, result: &mut RiskCheckResult) {
        if let Some(limit) = self
            .limits
            .resolve_threshold(&order.user_id, &order.symbol, LimitType::OrderSize)
        {
            if order.quantity > limit.value * self.config.warning_fraction {
                result.add_warning(format!(
                    "order size {:.2} is within warning band of limit {:.2}",
                    order.quantity, limit.value
                ));
            }
        }
        if let Some(limit) = self
            .limits
            .resolve_threshold(&order.user_id, &order.symbol, LimitType::Position)
        {
            if new_quantity.abs() > limit.value * self.config.warning_fraction {
                result.add_warning(format!(
                    "position {:.2} is within warning band of limit {:.2}",
                    new_quantity.abs(),
                    limit.value
                ));
            }
        }
        let _ = order_value;
    }

    fn effective_mark(&self, symbol: &Symbol, fallback: f64) -> f64 {
        let mark = self.marks.get(symbol);
        if mark.value() > 0.0 {
            mark.value()
        } else {
            fallback
        }
    }
}
