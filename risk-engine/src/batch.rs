//! Batches position and limit mutations so a burst of fills or limit
//! edits applies as one pass over the affected stores instead of one
//! channel round-trip per write.

use crate::evaluator::{Order, RiskCheckResult, RiskEvaluator};
use crate::limits::{LimitId, LimitStore, RiskLimit};
use crate::positions::{Position, PositionStore};
use common::{RiskError, RiskResult, Symbol, UserId};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

const DEFAULT_MAX_BATCH_SIZE: usize = 100;
const DEFAULT_MAX_BATCH_DELAY: Duration = Duration::from_millis(100);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One queued mutation, carrying its own one-shot reply channel
/// (capacity 1) so the submitter can await the outcome without the
/// pipeline needing to know anything about its caller.
pub enum RiskOperation {
    /// Apply a fill to a user's position.
    UpdatePosition {
        /// Owning user.
        user_id: UserId,
        /// Instrument.
        symbol: Symbol,
        /// Signed quantity, positive for a buy.
        signed_quantity: f64,
        /// Fill price.
        price: f64,
        /// Receives the position after the fill is applied.
        reply: Sender<Position>,
    },
    /// Insert a new limit.
    AddLimit {
        /// The limit to insert (id/timestamps are assigned by the store).
        limit: RiskLimit,
        /// Receives the stored limit, or the store's rejection.
        reply: Sender<RiskResult<RiskLimit>>,
    },
    /// Replace an existing limit.
    UpdateLimit {
        /// The replacement limit (`id` selects which one).
        limit: RiskLimit,
        /// Receives the stored limit, or the store's rejection.
        reply: Sender<RiskResult<RiskLimit>>,
    },
    /// Remove a limit.
    RemoveLimit {
        /// The owner the caller claims for this limit.
        user_id: UserId,
        /// The limit to remove.
        limit_id: LimitId,
        /// Receives the store's outcome.
        reply: Sender<RiskResult<()>>,
    },
    /// Run the pre-trade ladder against `order` from inside the batch
    /// worker, instead of the synchronous `RiskEngine::validate_order`
    /// path.
    CheckLimit {
        /// The order to evaluate.
        order: Order,
        /// Receives the ladder's outcome.
        reply: Sender<RiskCheckResult>,
    },
}

/// Bounded submission queue plus a worker loop that drains it in
/// size- or time-bounded batches.
pub struct BatchPipeline {
    sender: Sender<RiskOperation>,
    receiver: Receiver<RiskOperation>,
    max_batch_size: usize,
    max_batch_delay: Duration,
}

impl BatchPipeline {
    /// A pipeline whose submission queue holds at most `capacity`
    /// unconsumed operations, flushing after
    /// [`DEFAULT_MAX_BATCH_SIZE`]/[`DEFAULT_MAX_BATCH_DELAY`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_flush_tuning(capacity, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_BATCH_DELAY)
    }

    /// A pipeline with explicit flush tuning, as loaded from
    /// [`crate::config::RiskEngineConfig::batch_flush_threshold`] and
    /// [`crate::config::RiskEngineConfig::batch_flush_interval_ms`].
    #[must_use]
    pub fn with_flush_tuning(capacity: usize, max_batch_size: usize, max_batch_delay: Duration) -> Self {
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender,
            receiver,
            max_batch_size,
            max_batch_delay,
        }
    }

    /// Enqueue `operation` without blocking.
    ///
    /// # Errors
    /// Returns [`RiskError::ChannelFull`] if the submission queue is at
    /// capacity.
    pub fn submit(&self, operation: RiskOperation) -> RiskResult<()> {
        self.sender.try_send(operation).map_err(|err| match err {
            TrySendError::Full(_) => RiskError::ChannelFull("batch pipeline".to_string()),
            TrySendError::Disconnected(_) => RiskError::Internal("batch pipeline worker gone".to_string()),
        })
    }

    /// Run the drain loop until the submission queue disconnects.
    /// Intended for a dedicated worker thread; blocks the calling
    /// thread.
    pub fn run(&self, positions: &Arc<PositionStore>, limits: &Arc<LimitStore>, evaluator: &Arc<RiskEvaluator>) {
        loop {
            let Some(batch) = self.collect_batch() else {
                return;
            };
            if batch.is_empty() {
                continue;
            }
            apply_batch(batch, positions, limits, evaluator);
        }
    }

    fn collect_batch(&self) -> Option<Vec<RiskOperation>> {
        let first = match self.receiver.recv_timeout(self.max_batch_delay) {
            Ok(op) => op,
            Err(channel::RecvTimeoutError::Timeout) => return Some(Vec::new()),
            Err(channel::RecvTimeoutError::Disconnected) => return None,
        };
        let mut batch = vec![first];
        let deadline = Instant::now() + self.max_batch_delay;
        while batch.len() < self.max_batch_size && Instant::now() < deadline {
            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(op) => batch.push(op),
                Err(channel::RecvTimeoutError::Timeout) => break,
                Err(channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        Some(batch)
    }
}

/// Apply one collected batch, grouped by operation kind so each group
/// is a tight sequential pass over the store it touches.
fn apply_batch(
    batch: Vec<RiskOperation>,
    positions: &Arc<PositionStore>,
    limits: &Arc<LimitStore>,
    evaluator: &Arc<RiskEvaluator>,
) {
    trace!(size = batch.len(), "applying risk operation batch");
    let mut position_ops = Vec::new();
    let mut add_ops = Vec::new();
    let mut update_ops = Vec::new();
    let mut remove_ops = Vec::new();
    let mut check_ops = Vec::new();

    for op in batch {
        match op {
            RiskOperation::UpdatePosition { .. } => position_ops.push(op),
            RiskOperation::AddLimit { .. } => add_ops.push(op),
            RiskOperation::UpdateLimit { .. } => update_ops.push(op),
            RiskOperation::RemoveLimit { .. } => remove_ops.push(op),
            RiskOperation::CheckLimit { .. } => check_ops.push(op),
        }
    }

    for op in position_ops {
        if let RiskOperation::UpdatePosition { user_id, symbol, signed_quantity, price, reply } = op {
            let position = positions.apply_trade(&user_id, &symbol, signed_quantity, price);
            let _ = reply.send(position);
        }
    }
    for op in add_ops {
        if let RiskOperation::AddLimit { limit, reply } = op {
            let outcome = limits.add(limit);
            if outcome.is_err() {
                warn!("batched limit add rejected");
            }
            let _ = reply.send(outcome);
        }
    }
    for op in update_ops {
        if let RiskOperation::UpdateLimit { limit, reply } = op {
            let outcome = limits.update(limit);
            let _ = reply.send(outcome);
        }
    }
    for op in remove_ops {
        if let RiskOperation::RemoveLimit { user_id, limit_id, reply } = op {
            let outcome = limits.delete(&user_id, limit_id);
            let _ = reply.send(outcome);
        }
    }
    for op in check_ops {
        if let RiskOperation::CheckLimit { order, reply } = op {
            let result = evaluator.pre_trade_check(&order);
            let _ = reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{BreakerThresholds, CircuitBreakerTable};
    use crate::evaluator::{EvaluatorConfig, StaticVolatilityProvider};
    use crate::limits::{new_limit, LimitType};
    use crate::market_data::MarkPriceTable;
    use rustc_hash::FxHashMap;
    use std::time::Duration as StdDuration;

    fn user(s: &str) -> UserId {
        UserId::from(s)
    }
    fn sym(s: &str) -> Symbol {
        Symbol::from(s)
    }

    fn test_evaluator(limits: Arc<LimitStore>, positions: Arc<PositionStore>) -> Arc<RiskEvaluator> {
        let breakers = Arc::new(CircuitBreakerTable::new(BreakerThresholds::default()));
        let marks = MarkPriceTable::new();
        let volatility = Arc::new(StaticVolatilityProvider::new(FxHashMap::default(), 0.02));
        Arc::new(RiskEvaluator::new(limits, positions, breakers, marks, volatility, EvaluatorConfig::default()))
    }

    #[test]
    fn submit_past_capacity_returns_channel_full() {
        let pipeline = BatchPipeline::new(1);
        let (reply_a, _rx_a) = channel::bounded(1);
        let (reply_b, _rx_b) = channel::bounded(1);
        pipeline
            .submit(RiskOperation::UpdatePosition {
                user_id: user("u1"),
                symbol: sym("BTC-USD"),
                signed_quantity: 1.0,
                price: 50_000.0,
                reply: reply_a,
            })
            .unwrap();
        let err = pipeline.submit(RiskOperation::UpdatePosition {
            user_id: user("u1"),
            symbol: sym("BTC-USD"),
            signed_quantity: 1.0,
            price: 50_000.0,
            reply: reply_b,
        });
        assert!(matches!(err, Err(RiskError::ChannelFull(_))));
    }

    #[test]
    fn apply_batch_updates_position_store() {
        let positions = Arc::new(PositionStore::new());
        let limits = Arc::new(LimitStore::new());
        let evaluator = test_evaluator(limits.clone(), positions.clone());
        let (reply, rx) = channel::bounded(1);
        apply_batch(
            vec![RiskOperation::UpdatePosition {
                user_id: user("u1"),
                symbol: sym("BTC-USD"),
                signed_quantity: 1.0,
                price: 50_000.0,
                reply,
            }],
            &positions,
            &limits,
            &evaluator,
        );
        let position = rx.recv_timeout(StdDuration::from_secs(1)).unwrap();
        assert_eq!(position.quantity, 1.0);
    }

    #[test]
    fn apply_batch_processes_groups_in_kind_order() {
        let positions = Arc::new(PositionStore::new());
        let limits = Arc::new(LimitStore::new());
        let evaluator = test_evaluator(limits.clone(), positions.clone());
        let (add_reply, add_rx) = channel::bounded(1);
        let (pos_reply, pos_rx) = channel::bounded(1);
        apply_batch(
            vec![
                RiskOperation::UpdatePosition {
                    user_id: user("u1"),
                    symbol: sym("BTC-USD"),
                    signed_quantity: 1.0,
                    price: 50_000.0,
                    reply: pos_reply,
                },
                RiskOperation::AddLimit {
                    limit: new_limit(user("u1"), sym(""), LimitType::OrderSize, 100.0, None),
                    reply: add_reply,
                },
            ],
            &positions,
            &limits,
            &evaluator,
        );
        assert!(pos_rx.recv_timeout(StdDuration::from_secs(1)).is_ok());
        assert!(add_rx.recv_timeout(StdDuration::from_secs(1)).unwrap().is_ok());
    }

    #[test]
    fn check_limit_op_runs_the_pre_trade_ladder() {
        let positions = Arc::new(PositionStore::new());
        let limits = Arc::new(LimitStore::new());
        limits
            .add(new_limit(user("u1"), sym(""), LimitType::OrderSize, 1.0, None))
            .unwrap();
        let evaluator = test_evaluator(limits.clone(), positions.clone());
        let (reply, rx) = channel::bounded(1);
        apply_batch(
            vec![RiskOperation::CheckLimit {
                order: Order {
                    user_id: user("u1"),
                    symbol: sym("BTC-USD"),
                    side: common::Side::Buy,
                    quantity: 5.0,
                    price: 100.0,
                    order_type: common::OrderType::Limit,
                },
                reply,
            }],
            &positions,
            &limits,
            &evaluator,
        );
        let result = rx.recv_timeout(StdDuration::from_secs(1)).unwrap();
        assert!(!result.passed);
    }
}
