//! Alert aggregation: turns `Warning`-or-higher [`RiskEvent`]s into a
//! bounded, queryable alert history and a `tracing::error!` line, so an
//! operator tailing logs or hitting a status endpoint sees the same
//! picture.

use crate::event_bus::{RiskEvent, RiskEventKind, Severity};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{error, warn};

/// Severity of a recorded [`RiskAlert`], distinct from [`Severity`] only
/// in that it never carries `Info`: routine events are not alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    /// Worth a human glancing at.
    Warning,
    /// Requires attention.
    Critical,
    /// Trading-halting.
    Emergency,
}

/// A recorded alert, ready for an operator-facing feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    /// Triage level.
    pub level: AlertLevel,
    /// Rendered description of what happened.
    pub message: String,
    /// When it happened, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

const HISTORY_CAPACITY: usize = 1000;

/// Bounded ring buffer of recent alerts, fed by draining an
/// [`crate::event_bus::EventBus`] receiver.
pub struct AlertMonitor {
    history: RwLock<VecDeque<RiskAlert>>,
}

impl Default for AlertMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertMonitor {
    /// An empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Record `event` if it is `Warning` or higher severity. Lower
    /// severities are intentionally not recorded.
    pub fn observe(&self, event: &RiskEvent) {
        let level = match event.severity {
            Severity::Info => return,
            Severity::Warning => AlertLevel::Warning,
            Severity::Error => AlertLevel::Critical,
            Severity::Critical => AlertLevel::Emergency,
        };
        let message = describe(&event.kind);
        match level {
            AlertLevel::Emergency | AlertLevel::Critical => error!("{}", message),
            AlertLevel::Warning => warn!("{}", message),
        }
        let alert = RiskAlert {
            level,
            message,
            timestamp: event.timestamp.as_millis(),
        };
        let mut history = self.history.write();
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(alert);
    }

    /// The `limit` most recent alerts, newest last.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<RiskAlert> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}

fn describe(kind: &RiskEventKind) -> String {
    match kind {
        RiskEventKind::LimitBreach { user_id, symbol, detail } => {
            format!("limit breach for {user_id} on {symbol}: {detail}")
        }
        RiskEventKind::CircuitBreakerTripped { symbol } => {
            format!("circuit breaker tripped for {symbol}")
        }
        RiskEventKind::CircuitBreakerRecovered { symbol } => {
            format!("circuit breaker recovered for {symbol}")
        }
        RiskEventKind::PositionUpdate { user_id, symbol, quantity } => {
            format!("position update for {user_id} on {symbol}: quantity now {quantity}")
        }
        RiskEventKind::OrderRejected { user_id, symbol, reason } => {
            format!("order rejected for {user_id} on {symbol}: {reason}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Symbol, UserId};

    #[test]
    fn info_events_are_not_recorded() {
        let monitor = AlertMonitor::new();
        monitor.observe(&RiskEvent::new(
            Severity::Info,
            RiskEventKind::PositionUpdate {
                user_id: UserId::from("u1"),
                symbol: Symbol::from("BTC-USD"),
                quantity: 1.0,
            },
        ));
        assert!(monitor.recent(10).is_empty());
    }

    #[test]
    fn critical_events_are_recorded_and_ordered() {
        let monitor = AlertMonitor::new();
        monitor.observe(&RiskEvent::new(
            Severity::Critical,
            RiskEventKind::CircuitBreakerTripped { symbol: Symbol::from("BTC-USD") },
        ));
        monitor.observe(&RiskEvent::new(
            Severity::Warning,
            RiskEventKind::LimitBreach {
                user_id: UserId::from("u1"),
                symbol: Symbol::from("ETH-USD"),
                detail: "order size".to_string(),
            },
        ));
        let recent = monitor.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].level, AlertLevel::Critical);
        assert_eq!(recent[1].level, AlertLevel::Warning);
    }

    #[test]
    fn history_caps_at_capacity() {
        let monitor = AlertMonitor::new();
        for i in 0..(HISTORY_CAPACITY + 10) {
            monitor.observe(&RiskEvent::new(
                Severity::Warning,
                RiskEventKind::PositionUpdate {
                    user_id: UserId::from("u1"),
                    symbol: Symbol::from("BTC-USD"),
                    quantity: i as f64,
                },
            ));
        }
        assert_eq!(monitor.recent(HISTORY_CAPACITY + 10).len(), HISTORY_CAPACITY);
    }
}
