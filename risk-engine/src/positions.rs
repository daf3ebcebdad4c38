//! Position and realized/unrealized P&L storage.

use common::{Price, Symbol, Ts, UserId};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A user's net position in one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Owning user.
    pub user_id: UserId,
    /// Instrument.
    pub symbol: Symbol,
    /// Signed quantity; positive is long, negative is short.
    pub quantity: f64,
    /// Volume-weighted average entry price of the current open quantity.
    pub average_price: f64,
    /// Last mark applied by the market data processor.
    pub market_price: f64,
    /// Mark-to-market P&L on the open quantity.
    pub unrealized_pnl: f64,
    /// Cumulative realized P&L from closing or flipping trades.
    pub realized_pnl: f64,
    /// Last time this position was touched by a trade or a mark.
    pub last_update_time: Ts,
}

impl Position {
    fn flat(user_id: UserId, symbol: Symbol) -> Self {
        Self {
            user_id,
            symbol,
            quantity: 0.0,
            average_price: 0.0,
            market_price: 0.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            last_update_time: Ts::now(),
        }
    }

    fn recompute_unrealized(&mut self) {
        self.unrealized_pnl = (self.market_price - self.average_price) * self.quantity;
    }
}

/// Concurrent store of per-`(user, symbol)` positions, indexed a second
/// way by symbol so a single mark update can walk every holder without
/// scanning the whole book.
pub struct PositionStore {
    positions: DashMap<(UserId, Symbol), Arc<RwLock<Position>>>,
    holders_by_symbol: DashMap<Symbol, DashMap<UserId, ()>>,
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionStore {
    /// An empty position store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            positions: DashMap::new(),
            holders_by_symbol: DashMap::new(),
        }
    }

    /// The current position for `(user_id, symbol)`, or a flat position
    /// if none has been opened yet. Never errors: an unopened position
    /// is a legitimate, not exceptional, state.
    #[must_use]
    pub fn get(&self, user_id: &UserId, symbol: &Symbol) -> Position {
        self.positions
            .get(&(user_id.clone(), symbol.clone()))
            .map(|entry| entry.read().clone())
            .unwrap_or_else(|| Position::flat(user_id.clone(), symbol.clone()))
    }

    /// All open positions for `user_id`.
    #[must_use]
    pub fn list_for_user(&self, user_id: &UserId) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|entry| entry.key().0 == *user_id)
            .map(|entry| entry.value().read().clone())
            .collect()
    }

    /// Apply a fill of `signed_quantity` (positive = buy, negative =
    /// sell) at `price` to the position for `(user_id, symbol)`.
    ///
    /// Three cases, matching how a netted position book actually moves:
    /// - same sign as the existing position (or position is flat):
    ///   quantity grows, average price re-weights by notional.
    /// - opposite sign, `|signed_quantity| <= |quantity|`: quantity
    ///   shrinks or flattens, average price is unchanged, the closed
    ///   portion realizes P&L at `price - average_price`.
    /// - opposite sign, `|signed_quantity| > |quantity|`: the existing
    ///   quantity fully closes (realizing P&L), and the remainder opens
    ///   a new position on the other side at `price`.
    pub fn apply_trade(&self, user_id: &UserId, symbol: &Symbol, signed_quantity: f64, price: f64) -> Position {
        let key = (user_id.clone(), symbol.clone());
        let entry = self
            .positions
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(Position::flat(user_id.clone(), symbol.clone()))))
            .clone();
        self.index_holder(symbol, user_id);

        let mut position = entry.write();
        let same_direction = position.quantity == 0.0 || position.quantity.signum() == signed_quantity.signum();

        if same_direction {
            let old_notional = position.average_price * position.quantity.abs();
            let new_notional = price * signed_quantity.abs();
            let new_quantity = position.quantity + signed_quantity;
            position.average_price = if new_quantity.abs() > f64::EPSILON {
                (old_notional + new_notional) / new_quantity.abs()
            } else {
                0.0
            };
            position.quantity = new_quantity;
        } else if signed_quantity.abs() <= position.quantity.abs() {
            let closed = -signed_quantity * position.quantity.signum();
            position.realized_pnl += (price - position.average_price) * closed;
            position.quantity += signed_quantity;
            if position.quantity.abs() <= f64::EPSILON {
                position.quantity = 0.0;
                position.average_price = 0.0;
            }
        } else {
            let closing_quantity = position.quantity;
            position.realized_pnl += (price - position.average_price) * closing_quantity;
            let remainder = signed_quantity + closing_quantity;
            position.quantity = remainder;
            position.average_price = price;
        }

        position.last_update_time = Ts::now();
        position.recompute_unrealized();
        position.clone()
    }

    /// Apply a new mark to every position held in `symbol`, recomputing
    /// unrealized P&L. Returns the number of positions touched.
    pub fn update_mark(&self, symbol: &Symbol, mark: Price) -> usize {
        let Some(holders) = self.holders_by_symbol.get(symbol) else {
            return 0;
        };
        let mut touched = 0;
        for holder in holders.iter() {
            let key = (holder.key().clone(), symbol.clone());
            if let Some(entry) = self.positions.get(&key) {
                let mut position = entry.write();
                position.market_price = mark.value();
                position.recompute_unrealized();
                position.last_update_time = Ts::now();
                touched += 1;
            }
        }
        touched
    }

    /// Gross notional exposure (`sum |quantity| * market_price`) across
    /// all of `user_id`'s open positions.
    #[must_use]
    pub fn gross_exposure(&self, user_id: &UserId) -> f64 {
        self.list_for_user(user_id)
            .iter()
            .map(|p| p.quantity.abs() * p.market_price)
            .sum()
    }

    fn index_holder(&self, symbol: &Symbol, user_id: &UserId) {
        self.holders_by_symbol
            .entry(symbol.clone())
            .or_default()
            .insert(user_id.clone(), ());
    }
}
