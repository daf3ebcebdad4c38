//! Error taxonomy for the risk engine.

use thiserror::Error;

/// Errors surfaced synchronously to a caller of the engine's public API.
///
/// Limit breaches and circuit-breaker rejections are *not* represented
/// here: they ride inside `RiskCheckResult` as a failed check, never as
/// an `Err`. This enum is reserved for genuine operational failures.
#[derive(Debug, Error)]
pub enum RiskError {
    /// A request carried an empty id, a non-positive numeric field, or a
    /// limit with `value <= 0`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced position or limit does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The symbol's circuit breaker is not Closed. Distinct from the
    /// `!passed` result a pre-trade check returns for the same
    /// condition: this variant is for callers that query breaker state
    /// directly rather than through `validate_order`.
    #[error("circuit breaker active for {0}")]
    CircuitBreakerActive(String),

    /// A batch enqueue or its reply wait exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    OperationTimeout(std::time::Duration),

    /// A non-blocking ingress (market data or event bus) refused the
    /// enqueue because its queue was full.
    #[error("channel full: {0}")]
    ChannelFull(String),

    /// An invariant the caller cannot have violated was broken
    /// internally (e.g. an unknown batch operation kind reached the
    /// worker). Logged with full context; never expected in practice.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the engine.
pub type RiskResult<T> = Result<T, RiskError>;
