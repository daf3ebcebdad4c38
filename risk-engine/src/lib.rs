//! Real-time pre-trade risk engine.
//!
//! Eight components, each owning one concern:
//! - [`limits`]: risk limit storage (C1)
//! - [`positions`]: position and P&L storage (C2)
//! - [`circuit_breaker`]: per-symbol circuit breaker state machine (C3)
//! - [`market_data`]: mark price table and ingress (C4)
//! - [`evaluator`]: the synchronous pre-trade check ladder (C5)
//! - [`batch`]: batched position and limit mutation pipeline (C6)
//! - [`trade_ingress`]: converts matching engine fills into batch
//!   operations (C7)
//! - [`event_bus`]: non-blocking fan-out of risk events (C8)
//!
//! [`engine::RiskEngine`] wires all eight into one handle and is the
//! only type most callers need.

pub mod batch;
pub mod circuit_breaker;
pub mod config;
pub mod engine;
pub mod evaluator;
pub mod event_bus;
pub mod limits;
pub mod market_data;
pub mod metrics;
pub mod monitor;
pub mod pool;
pub mod positions;
pub mod trade_ingress;

pub use config::RiskEngineConfig;
pub use engine::{AccountRisk, RiskEngine};
pub use evaluator::{Order, RiskCheckResult, RiskLevel};
