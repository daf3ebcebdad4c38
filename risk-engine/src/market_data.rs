//! Mark price table and the market data ingress that keeps it, position
//! unrealized P&L, and circuit breakers in sync.
//!
//! The mark table is deliberately its own small lock, separate from
//! [`crate::positions::PositionStore`]'s per-position locks, so a burst
//! of mark updates never contends with a pre-trade check reading the
//! same symbol's price.

use crate::circuit_breaker::CircuitBreakerTable;
use crate::event_bus::{EventBus, RiskEvent, RiskEventKind, Severity};
use crate::positions::PositionStore;
use common::{Price, Symbol, Ts};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

/// A single symbol's last traded or quoted price, feeding both position
/// unrealized P&L and circuit breaker evaluation.
#[derive(Clone)]
pub struct MarkPriceTable {
    prices: Arc<RwLock<FxHashMap<Symbol, Price>>>,
}

impl Default for MarkPriceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkPriceTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prices: Arc::new(RwLock::new(FxHashMap::default())),
        }
    }

    /// The last known mark for `symbol`, or [`Price::ZERO`] if none has
    /// ever been observed.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Price {
        self.prices.read().get(symbol).copied().unwrap_or(Price::ZERO)
    }

    /// Set the mark for `symbol` under a single short write lock.
    pub fn set(&self, symbol: Symbol, price: Price) {
        self.prices.write().insert(symbol, price);
    }
}

/// A single tick: a new mark observed for `symbol` at `timestamp`.
#[derive(Debug, Clone)]
pub struct MarketDataUpdate {
    /// The instrument.
    pub symbol: Symbol,
    /// The new mark.
    pub price: Price,
    /// When the update was observed upstream.
    pub timestamp: Ts,
}

/// Applies each incoming [`MarketDataUpdate`] to the mark table, the
/// position store, and the circuit breaker table, in that order, and
/// publishes a non-blocking event when a breaker trips.
pub struct MarketDataProcessor {
    mark_table: MarkPriceTable,
    positions: Arc<PositionStore>,
    breakers: Arc<CircuitBreakerTable>,
    events: Arc<EventBus>,
}

impl MarketDataProcessor {
    /// Wire a processor against the engine's shared components.
    #[must_use]
    pub fn new(
        mark_table: MarkPriceTable,
        positions: Arc<PositionStore>,
        breakers: Arc<CircuitBreakerTable>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            mark_table,
            positions,
            breakers,
            events,
        }
    }

    /// Apply one update. Returns the number of positions whose
    /// unrealized P&L was recomputed.
    pub fn process(&self, update: &MarketDataUpdate) -> usize {
        self.mark_table.set(update.symbol.clone(), update.price);
        let touched = self.positions.update_mark(&update.symbol, update.price);

        if self.breakers.probe_price_update(&update.symbol, update.price.value()) {
            crate::metrics::record_breaker_trip(&update.symbol.0);
            self.events.publish(RiskEvent::new(
                Severity::Critical,
                RiskEventKind::CircuitBreakerTripped { symbol: update.symbol.clone() },
            ));
        }

        debug!(symbol = %update.symbol, price = %update.price, touched, "market data applied");
        touched
    }

    /// Drain `updates` from a bounded channel until the channel is
    /// closed, applying each one. Intended to run on a dedicated worker
    /// thread.
    pub fn run(&self, updates: &crossbeam::channel::Receiver<MarketDataUpdate>) {
        while let Ok(update) = updates.recv() {
            self.process(&update);
        }
    }
}
