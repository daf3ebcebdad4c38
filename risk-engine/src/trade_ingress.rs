//! Converts executed trades from an external matching engine into
//! batched position updates and mark price ticks.

use crate::batch::{BatchPipeline, RiskOperation};
use crate::market_data::MarketDataUpdate;
use common::{Price, Side, Symbol, Ts, UserId};
use crossbeam::channel::Sender;
use tracing::warn;
use uuid::Uuid;

/// A single executed trade, as reported by the matching engine.
#[derive(Debug, Clone)]
pub struct Trade {
    /// Unique trade identity assigned by the matching engine.
    pub id: Uuid,
    /// Order id on the buy side.
    pub buy_order_id: Uuid,
    /// Order id on the sell side.
    pub sell_order_id: Uuid,
    /// Instrument traded.
    pub symbol: Symbol,
    /// Execution price.
    pub price: f64,
    /// Execution quantity (always positive; direction comes from each
    /// side's own order).
    pub quantity: f64,
    /// Which side of the two orders initiated the trade (crossed the
    /// spread).
    pub taker_side: Side,
    /// When the match occurred.
    pub timestamp: Ts,
}

/// Resolves the owning user for an order id, decoupling trade ingress
/// from whatever component owns the order book.
pub trait OrderOwnerLookup: Send + Sync {
    /// The user who submitted `order_id`, if still known.
    fn owner_of(&self, order_id: Uuid) -> Option<UserId>;
}

/// A source of executed trades the engine pulls from (or is pushed
/// into) continuously.
pub trait TradeSource: Send + Sync {
    /// Block until the next trade is available, or `None` once the
    /// source is permanently exhausted.
    fn next_trade(&self) -> Option<Trade>;
}

/// Drives a [`TradeSource`], translating each [`Trade`] into one
/// [`RiskOperation::UpdatePosition`] per side plus a
/// [`MarketDataUpdate`], without blocking on either pipeline.
pub struct TradeIngress<S: TradeSource, L: OrderOwnerLookup> {
    source: S,
    owners: L,
    batch: std::sync::Arc<BatchPipeline>,
    market_data: Sender<MarketDataUpdate>,
}

impl<S: TradeSource, L: OrderOwnerLookup> TradeIngress<S, L> {
    /// Wire an ingress loop against a trade source, an order-owner
    /// lookup, the shared batch pipeline, and the market data channel.
    #[must_use]
    pub fn new(
        source: S,
        owners: L,
        batch: std::sync::Arc<BatchPipeline>,
        market_data: Sender<MarketDataUpdate>,
    ) -> Self {
        Self {
            source,
            owners,
            batch,
            market_data,
        }
    }

    /// Consume trades from the source until it is exhausted.
    pub fn run(&self) {
        while let Some(trade) = self.source.next_trade() {
            self.ingest(&trade);
        }
    }

    /// Process one trade: enqueue a position update for each side that
    /// still has a known owner, and forward the fill as a market data
    /// tick.
    pub fn ingest(&self, trade: &Trade) {
        self.enqueue_side(trade.buy_order_id, trade, Side::Buy);
        self.enqueue_side(trade.sell_order_id, trade, Side::Sell);

        if let Err(err) = self.market_data.try_send(MarketDataUpdate {
            symbol: trade.symbol.clone(),
            price: Price(trade.price),
            timestamp: trade.timestamp,
        }) {
            warn!(error = %err, "dropping market data tick from trade ingress");
        }
    }

    fn enqueue_side(&self, order_id: Uuid, trade: &Trade, side: Side) {
        let Some(user_id) = self.owners.owner_of(order_id) else {
            warn!(%order_id, "trade ingress: unknown order owner, skipping position update");
            return;
        };
        let (reply, _rx) = crossbeam::channel::bounded(1);
        let outcome = self.batch.submit(RiskOperation::UpdatePosition {
            user_id,
            symbol: trade.symbol.clone(),
            signed_quantity: side.sign() * trade.quantity,
            price: trade.price,
            reply,
        });
        if let Err(err) = outcome {
            warn!(%err, %order_id, "failed to enqueue position update from trade ingress");
        }
    }
}
