//! Bounded, non-blocking fan-out of risk events to observability
//! consumers (logging, alerting, metrics). A slow or absent consumer
//! must never add latency to the hot path that produces these events,
//! so producers always `try_send` and a full bus simply drops the
//! event and counts it.

use common::{Symbol, Ts, UserId};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Severity of a [`RiskEvent`], mirroring how an alerting pipeline would
/// triage it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Routine, informational.
    Info,
    /// Worth a human glancing at, not paging anyone.
    Warning,
    /// A check or operation failed; needs investigation.
    Error,
    /// Trading-halting; page someone now.
    Critical,
}

/// What happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RiskEventKind {
    /// A pre- or post-trade check failed a limit.
    LimitBreach {
        /// The user whose order or position triggered the breach.
        user_id: UserId,
        /// The instrument involved.
        symbol: Symbol,
        /// Human-readable description of which limit and by how much.
        detail: String,
    },
    /// A symbol's circuit breaker opened.
    CircuitBreakerTripped {
        /// The instrument whose breaker tripped.
        symbol: Symbol,
    },
    /// A symbol's circuit breaker closed after a successful probe
    /// period.
    CircuitBreakerRecovered {
        /// The instrument whose breaker recovered.
        symbol: Symbol,
    },
    /// A position changed due to a fill.
    PositionUpdate {
        /// The owning user.
        user_id: UserId,
        /// The instrument.
        symbol: Symbol,
        /// Quantity after the update.
        quantity: f64,
    },
    /// An order failed pre-trade validation.
    OrderRejected {
        /// The user whose order was rejected.
        user_id: UserId,
        /// The instrument.
        symbol: Symbol,
        /// Why.
        reason: String,
    },
}

/// An event published onto the bus, timestamped at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    /// Triage level.
    pub severity: Severity,
    /// What happened.
    pub kind: RiskEventKind,
    /// When it happened.
    pub timestamp: Ts,
}

impl RiskEvent {
    /// Construct an event stamped with the current time.
    #[must_use]
    pub fn new(severity: Severity, kind: RiskEventKind) -> Self {
        Self {
            severity,
            kind,
            timestamp: Ts::now(),
        }
    }
}

/// Bounded multi-producer, multi-consumer event channel with a drop
/// counter rather than backpressure.
pub struct EventBus {
    sender: Sender<RiskEvent>,
    receiver: Receiver<RiskEvent>,
    dropped: AtomicU64,
}

impl EventBus {
    /// A bus with room for `capacity` buffered, unconsumed events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender,
            receiver,
            dropped: AtomicU64::new(0),
        }
    }

    /// Publish an event without blocking. On a full bus the event is
    /// dropped and counted, and a `warn!` is logged so a saturated
    /// pipeline is visible without slowing down its producer.
    pub fn publish(&self, event: RiskEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("event bus full, dropping risk event");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// A clone of the receiving end; every clone independently competes
    /// for events (this is a work queue, not a broadcast).
    #[must_use]
    pub fn receiver(&self) -> Receiver<RiskEvent> {
        self.receiver.clone()
    }

    /// Total events dropped since construction because the bus was
    /// full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
