//! Core value types shared between the risk engine and its callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identifier.
///
/// An empty `UserId` (`""`) is a valid scope key: it denotes a
/// global (not user-specific) limit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// True when this is the "global" scope key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque instrument identifier.
///
/// An empty `Symbol` (`""`) is a valid scope key: it denotes a
/// symbol-agnostic (applies to all symbols for a user) limit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    /// True when this is the "all symbols" scope key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy / long.
    Buy,
    /// Sell / short.
    Sell,
}

impl Side {
    /// +1 for `Buy`, -1 for `Sell`.
    #[must_use]
    pub const fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

/// Order type, carried through for completeness; the evaluator does not
/// branch on it beyond validating it is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Resting limit order.
    Limit,
    /// Immediate-or-cancel market order.
    Market,
}

/// A monetary price, stored as IEEE-754 double precision.
///
/// Prices are never compared for equality in risk logic; use
/// [`Price::approx_eq`] where a tolerance comparison is actually needed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Price(pub f64);

impl Price {
    /// The zero price, used as the "unset" sentinel for a circuit
    /// breaker's reference price.
    pub const ZERO: Self = Self(0.0);

    /// Raw `f64` value.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Tolerant comparison; the spec explicitly forbids exact float
    /// equality checks on prices.
    #[must_use]
    pub fn approx_eq(self, other: Self) -> bool {
        (self.0 - other.0).abs() <= f64::EPSILON * 8.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// A signed quantity (positive = long/buy, negative = short/sell),
/// stored as IEEE-754 double precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Qty(pub f64);

impl Qty {
    /// The zero quantity.
    pub const ZERO: Self = Self(0.0);

    /// Raw `f64` value.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// True when the quantity is (within tolerance) zero.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0.abs() <= f64::EPSILON * 8.0
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Wall-clock timestamp, stored as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ts(pub i64);

impl Ts {
    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    /// Seconds since the Unix epoch.
    #[must_use]
    pub const fn as_secs(self) -> i64 {
        self.0 / 1000
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Elapsed time since `earlier`, saturating at zero if `earlier` is
    /// actually later than `self`.
    #[must_use]
    pub fn elapsed_since(self, earlier: Self) -> std::time::Duration {
        let millis = (self.0 - earlier.0).max(0);
        std::time::Duration::from_millis(millis.unsigned_abs())
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
