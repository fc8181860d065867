// =============================================================================
// Trade Aggregator — trades to period candles, batch or pull-based
// =============================================================================
//
// Each valid trade becomes a one-trade source bucket at the second it
// happened in and is folded with the resampler's boundary/gap logic, so a
// run of trades yields one candle per period from the first trade to the
// last, quiet periods forward-filled.
//
// The lazy form holds at most the candle being built plus the first trade
// of the next period: a candle is handed out only once a trade from a later
// period has been pulled, or the source runs dry.
// =============================================================================

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::market_data::resampler::{FoldState, PeriodFolder};
use crate::types::{Bucket, Trade};

/// Rejects trades that go back in time and drops zero-valued ones.
#[derive(Debug, Clone, Default)]
pub(crate) struct TradeGate {
    last_timestamp_ms: Option<i64>,
}

impl TradeGate {
    /// Source bucket for `trade`, `Ok(None)` when the trade is dropped.
    pub(crate) fn admit(&mut self, trade: &Trade) -> EngineResult<Option<Bucket>> {
        if let Some(previous) = self.last_timestamp_ms {
            if trade.timestamp_ms < previous {
                return Err(EngineError::NonMonotonic {
                    previous,
                    current: trade.timestamp_ms,
                });
            }
        }
        self.last_timestamp_ms = Some(trade.timestamp_ms);

        let bucket = Bucket::from_trade(trade);
        if bucket.is_none() {
            debug!(
                timestamp_ms = trade.timestamp_ms,
                price = trade.price,
                quantity = trade.quantity,
                "dropping zero-valued trade"
            );
        }
        Ok(bucket)
    }
}

/// Pull-based trade-to-candle aggregator.
///
/// Consumes its source destructively; not restartable.  Stop pulling to
/// cancel.
#[derive(Debug)]
pub struct TradeAggregator<I> {
    trades: I,
    gate: TradeGate,
    folder: PeriodFolder,
}

impl<I> TradeAggregator<I>
where
    I: Iterator<Item = Trade>,
{
    /// Aggregate `trades` into candles of `period` seconds.
    pub fn new(trades: impl IntoIterator<IntoIter = I>, period: i64) -> EngineResult<Self> {
        Ok(Self {
            trades: trades.into_iter(),
            gate: TradeGate::default(),
            folder: PeriodFolder::new(period)?,
        })
    }

    pub fn period(&self) -> i64 {
        self.folder.period()
    }

    /// Produce the next completed candle.
    ///
    /// `Ok(None)` once the source is exhausted and the last candle has been
    /// handed out.  A non-monotonic trade ends the sequence with an error.
    pub fn try_next(&mut self) -> EngineResult<Option<Bucket>> {
        loop {
            match self.folder.state() {
                FoldState::ReadyToEmit => return Ok(self.folder.take_ready()),
                FoldState::Exhausted => return Ok(None),
                FoldState::Accumulating => {
                    let Some(trade) = self.trades.next() else {
                        return Ok(self.folder.finish());
                    };
                    match self.gate.admit(&trade) {
                        Ok(Some(bucket)) => self.folder.push(bucket)?,
                        Ok(None) => {}
                        Err(e) => {
                            self.folder.finish();
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

impl<I> Iterator for TradeAggregator<I>
where
    I: Iterator<Item = Trade>,
{
    type Item = EngineResult<Bucket>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}

/// Aggregate a finite, time-ordered batch of trades into candles.
///
/// An empty batch (or one where every trade is dropped) yields no candles.
pub fn aggregate_trades(trades: &[Trade], period: i64) -> EngineResult<Vec<Bucket>> {
    TradeAggregator::new(trades.iter().copied(), period)?.collect()
}
