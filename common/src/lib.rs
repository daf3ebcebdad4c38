//! Shared value types and error taxonomy for the real-time risk engine.

pub mod errors;
pub mod types;

pub use errors::{RiskError, RiskResult};
pub use types::{OrderType, Price, Qty, Side, Symbol, Ts, UserId};
