//! Per-symbol circuit breaker state machine.
//!
//! Three states: `Closed` (trading allowed), `Open` (trading blocked
//! after a price shock), `HalfOpen` (a cooldown has elapsed and a
//! limited number of probe successes are required before closing
//! again). Each symbol gets its own breaker so a shock in one
//! instrument never blocks another.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use common::Symbol;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// The breaker's externally observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Trading allowed.
    Closed,
    /// Trading blocked.
    Open,
    /// Cooldown elapsed; probing for recovery.
    HalfOpen,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Per-symbol breaker state. Reads (`state`, `is_blocking`) are a single
/// atomic load; the rarer write paths (`probe_price_update`,
/// `record_success`, `record_failure`, cooldown scan) take the
/// `is_open`/`half_open` fields in sequence rather than under one lock,
/// matching how the original threshold breaker kept the hot path
/// lock-free at the cost of that narrow window.
struct SymbolBreaker {
    state: AtomicU32,
    reference_price_bits: AtomicU64,
    last_transition_time: AtomicI64,
    half_open_successes: AtomicU32,
}

const STATE_CLOSED: u32 = 0;
const STATE_OPEN: u32 = 1;
const STATE_HALF_OPEN: u32 = 2;

impl SymbolBreaker {
    fn new() -> Self {
        Self {
            state: AtomicU32::new(STATE_CLOSED),
            reference_price_bits: AtomicU64::new(0),
            last_transition_time: AtomicI64::new(0),
            half_open_successes: AtomicU32::new(0),
        }
    }

    fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    fn reference_price(&self) -> f64 {
        f64::from_bits(self.reference_price_bits.load(Ordering::Relaxed))
    }

    fn set_reference_price(&self, price: f64) {
        self.reference_price_bits.store(price.to_bits(), Ordering::Relaxed);
    }
}

/// Configuration shared by every symbol's breaker, unless overridden.
#[derive(Debug, Clone, Copy)]
pub struct BreakerThresholds {
    /// Fractional price move (e.g. `0.10` for 10%) that trips the
    /// breaker from `Closed`.
    pub price_change_threshold: f64,
    /// How long the breaker stays `Open` before moving to `HalfOpen`, in
    /// milliseconds.
    pub cooldown_ms: i64,
    /// Consecutive probe successes required to close from `HalfOpen`.
    pub half_open_successes_required: u32,
}

impl Default for BreakerThresholds {
    fn default() -> Self {
        Self {
            price_change_threshold: 0.10,
            cooldown_ms: 300_000,
            half_open_successes_required: 3,
        }
    }
}

/// Owns one [`SymbolBreaker`] per symbol and the periodic cooldown scan.
pub struct CircuitBreakerTable {
    breakers: DashMap<Symbol, Arc<SymbolBreaker>>,
    overrides: DashMap<Symbol, BreakerThresholds>,
    defaults: BreakerThresholds,
}

impl CircuitBreakerTable {
    /// A new table using `defaults` for any symbol without an override.
    #[must_use]
    pub fn new(defaults: BreakerThresholds) -> Self {
        Self {
            breakers: DashMap::new(),
            overrides: DashMap::new(),
            defaults,
        }
    }

    /// Set symbol-specific thresholds, replacing the defaults for that
    /// symbol only.
    pub fn configure(&self, symbol: Symbol, thresholds: BreakerThresholds) {
        self.overrides.insert(symbol, thresholds);
    }

    fn thresholds_for(&self, symbol: &Symbol) -> BreakerThresholds {
        self.overrides.get(symbol).map_or(self.defaults, |t| *t)
    }

    fn get_or_create(&self, symbol: &Symbol) -> Arc<SymbolBreaker> {
        self.breakers
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(SymbolBreaker::new()))
            .clone()
    }

    /// Whether `symbol` currently blocks new orders (`Open` or
    /// `HalfOpen`, never `Closed`).
    #[must_use]
    pub fn is_blocking(&self, symbol: &Symbol) -> bool {
        self.breakers
            .get(symbol)
            .is_some_and(|b| b.state() != BreakerState::Closed)
    }

    /// The current state for `symbol` (`Closed` if never observed).
    #[must_use]
    pub fn state(&self, symbol: &Symbol) -> BreakerState {
        self.breakers.get(symbol).map_or(BreakerState::Closed, |b| b.state())
    }

    /// Feed a new mark price for `symbol`. Establishes the reference
    /// price on first observation. Returns `true` if this update tripped
    /// the breaker from `Closed` to `Open`.
    pub fn probe_price_update(&self, symbol: &Symbol, price: f64) -> bool {
        let breaker = self.get_or_create(symbol);
        let reference = breaker.reference_price();
        if reference <= 0.0 {
            breaker.set_reference_price(price);
            return false;
        }
        if breaker.state() != BreakerState::Closed {
            return false;
        }
        let change = (price - reference).abs() / reference;
        let thresholds = self.thresholds_for(symbol);
        if change >= thresholds.price_change_threshold {
            breaker.state.store(STATE_OPEN, Ordering::Release);
            breaker.last_transition_time.store(now_millis(), Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Record a successful probe while `HalfOpen`. Closes the breaker
    /// (resetting its reference price to the last observed price) once
    /// enough consecutive successes have been recorded. A no-op in any
    /// other state.
    pub fn record_success(&self, symbol: &Symbol) {
        let Some(breaker) = self.breakers.get(symbol) else {
            return;
        };
        if breaker.state() != BreakerState::HalfOpen {
            return;
        }
        let thresholds = self.thresholds_for(symbol);
        let successes = breaker.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
        if successes >= thresholds.half_open_successes_required {
            breaker.state.store(STATE_CLOSED, Ordering::Release);
            breaker.half_open_successes.store(0, Ordering::Relaxed);
        }
    }

    /// Record a failed probe while `HalfOpen`: reopen and reset the
    /// cooldown clock. A no-op in any other state.
    pub fn record_failure(&self, symbol: &Symbol) {
        let Some(breaker) = self.breakers.get(symbol) else {
            return;
        };
        if breaker.state() != BreakerState::HalfOpen {
            return;
        }
        breaker.state.store(STATE_OPEN, Ordering::Release);
        breaker.half_open_successes.store(0, Ordering::Relaxed);
        breaker.last_transition_time.store(now_millis(), Ordering::Relaxed);
    }

    /// Advance any `Open` breaker whose cooldown has elapsed to
    /// `HalfOpen`. Intended to be called from a periodic (roughly 1 Hz)
    /// scanner task; cheap to call more often since it only touches
    /// breakers actually in `Open`.
    pub fn scan_cooldowns(&self) {
        let now = now_millis();
        for entry in &self.breakers {
            let breaker = entry.value();
            if breaker.state() != BreakerState::Open {
                continue;
            }
            let thresholds = self.thresholds_for(entry.key());
            let last = breaker.last_transition_time.load(Ordering::Relaxed);
            if now - last >= thresholds.cooldown_ms {
                breaker.state.store(STATE_HALF_OPEN, Ordering::Release);
                breaker.half_open_successes.store(0, Ordering::Relaxed);
            }
        }
    }
}
