// =============================================================================
// Trade Stream — async candle aggregation and the live aggTrade feed
// =============================================================================

use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::{Context as _, Result};
use futures_util::future::ready;
use futures_util::stream::{BoxStream, Stream};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::error::EngineResult;
use crate::market_data::resampler::{FoldState, PeriodFolder};
use crate::market_data::trade_aggregator::TradeGate;
use crate::types::{Bucket, Trade};

// ---------------------------------------------------------------------------
// CandleStream
// ---------------------------------------------------------------------------

/// Async counterpart of [`TradeAggregator`](crate::market_data::TradeAggregator):
/// folds a stream of trades into candles of a fixed period.
///
/// A candle is yielded once a trade from a later period arrives; the last
/// one when the trade stream ends.
pub struct CandleStream<S> {
    trades: S,
    gate: TradeGate,
    folder: PeriodFolder,
}

impl<S> CandleStream<S>
where
    S: Stream<Item = Trade> + Unpin,
{
    pub fn new(trades: S, period: i64) -> EngineResult<Self> {
        Ok(Self {
            trades,
            gate: TradeGate::default(),
            folder: PeriodFolder::new(period)?,
        })
    }

    pub fn period(&self) -> i64 {
        self.folder.period()
    }
}

impl<S> Stream for CandleStream<S>
where
    S: Stream<Item = Trade> + Unpin,
{
    type Item = EngineResult<Bucket>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.folder.state() {
                FoldState::ReadyToEmit => return Poll::Ready(this.folder.take_ready().map(Ok)),
                FoldState::Exhausted => return Poll::Ready(None),
                FoldState::Accumulating => {
                    let Some(trade) = futures_util::ready!(this.trades.poll_next_unpin(cx)) else {
                        return Poll::Ready(this.folder.finish().map(Ok));
                    };
                    match this.gate.admit(&trade) {
                        Ok(Some(bucket)) => {
                            if let Err(e) = this.folder.push(bucket) {
                                return Poll::Ready(Some(Err(e)));
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            this.folder.finish();
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Trade WebSocket feed
// ---------------------------------------------------------------------------

/// Connect to the Binance aggTrade WebSocket stream for a single symbol and
/// expose it as a stream of [`Trade`]s.
///
/// Malformed messages are logged and skipped.  The stream ends when the
/// socket disconnects or errors so that the caller can reconnect.
pub async fn connect_trade_feed(symbol: &str) -> Result<BoxStream<'static, Trade>> {
    let lower = symbol.to_lowercase();
    let url = format!("wss://stream.binance.com:9443/ws/{lower}@aggTrade");
    info!(url = %url, symbol = %symbol, "connecting to trade WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to trade WebSocket")?;

    info!(symbol = %symbol, "trade WebSocket connected");
    let (_write, read) = ws_stream.split();
    let symbol = symbol.to_string();

    let trades = read
        .take_while(move |msg| {
            if let Err(e) = msg {
                error!(symbol = %symbol, error = %e, "trade WebSocket read error");
            }
            ready(msg.is_ok())
        })
        .filter_map(|msg| {
            // Ping / Pong / Binary / Close frames carry no trades; tungstenite
            // answers pings itself.
            let trade = match msg {
                Ok(Message::Text(text)) => match parse_agg_trade(&text) {
                    Ok(trade) => Some(trade),
                    Err(e) => {
                        warn!(error = %e, "failed to parse aggTrade message");
                        None
                    }
                },
                _ => None,
            };
            ready(trade)
        });

    Ok(trades.boxed())
}

/// Parse a Binance aggTrade message.
///
/// Expected shape:
/// ```json
/// { "e": "aggTrade", "s": "BTCUSDT", "p": "37000.00", "q": "0.123", "T": 1700000000123, "m": true }
/// ```
pub fn parse_agg_trade(text: &str) -> Result<Trade> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse aggTrade JSON")?;

    let price: f64 = root["p"]
        .as_str()
        .context("missing field p")?
        .parse()
        .context("failed to parse price")?;

    let quantity: f64 = root["q"]
        .as_str()
        .context("missing field q")?
        .parse()
        .context("failed to parse quantity")?;

    let timestamp_ms = root["T"].as_i64().context("missing field T")?;

    let is_buyer_maker = root["m"]
        .as_bool()
        .context("missing field m")?;

    Ok(Trade::new(timestamp_ms, price, quantity, is_buyer_maker))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::market_data::trade_aggregator::aggregate_trades;
    use futures_util::stream;

    fn minute_trades() -> Vec<Trade> {
        vec![
            Trade::new(1_000, 100.0, 0.5, false),
            Trade::new(59_999, 101.0, 0.25, true),
            Trade::new(60_000, 99.5, 1.0, false),
            Trade::new(250_000, 98.0, 2.0, true),
            Trade::new(250_001, 0.0, 2.0, true),
            Trade::new(299_000, 102.0, 1.5, false),
        ]
    }

    #[tokio::test]
    async fn stream_matches_batch() {
        let trades = minute_trades();
        let streamed: Vec<Bucket> = CandleStream::new(stream::iter(trades.clone()), 60)
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        let batch = aggregate_trades(&trades, 60).unwrap();
        assert_eq!(streamed, batch);
        assert_eq!(streamed.len(), 5);
        assert!(streamed[2].is_gap_fill());
        assert!(streamed[3].is_gap_fill());
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let mut candles = CandleStream::new(stream::iter(Vec::<Trade>::new()), 60).unwrap();
        assert!(candles.next().await.is_none());
    }

    #[tokio::test]
    async fn backwards_trade_ends_stream_with_error() {
        let trades = vec![Trade::new(5_000, 1.0, 1.0, false), Trade::new(4_000, 1.0, 1.0, false)];
        let mut candles = CandleStream::new(stream::iter(trades), 60).unwrap();
        assert!(matches!(
            candles.next().await,
            Some(Err(EngineError::NonMonotonic { .. }))
        ));
        assert!(candles.next().await.is_none());
    }

    #[test]
    fn parse_agg_trade_ok() {
        let json = r#"{
            "e": "aggTrade",
            "E": 1700000000200,
            "s": "BTCUSDT",
            "a": 12345,
            "p": "37000.50",
            "q": "0.125",
            "f": 100,
            "l": 105,
            "T": 1700000000123,
            "m": true
        }"#;
        let trade = parse_agg_trade(json).expect("should parse");
        assert_eq!(trade.timestamp_ms, 1_700_000_000_123);
        assert!((trade.price - 37000.5).abs() < f64::EPSILON);
        assert!((trade.quantity - 0.125).abs() < f64::EPSILON);
        assert!(trade.is_buyer_maker);
    }

    #[test]
    fn parse_agg_trade_missing_field() {
        let json = r#"{ "e": "aggTrade", "p": "1.0", "q": "2.0", "m": false }"#;
        assert!(parse_agg_trade(json).is_err());
    }
}
