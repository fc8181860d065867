pub mod bucket_store;
pub mod kline;
pub mod resampler;
pub mod trade_aggregator;
pub mod trade_stream;
pub mod window;

pub use bucket_store::BucketStore;
pub use kline::{record_from_kline, KlineDump};
pub use resampler::{resample, Resampler};
pub use trade_aggregator::{aggregate_trades, TradeAggregator};
pub use trade_stream::{connect_trade_feed, parse_agg_trade, CandleStream};
pub use window::{Selection, WindowAccessor, MISSING};
