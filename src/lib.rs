// =============================================================================
// Candle Engine — OHLCV bucket storage, resampling and trade aggregation
// =============================================================================

pub mod error;
pub mod market_data;
pub mod runtime_config;
pub mod storage;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use market_data::{
    aggregate_trades, resample, BucketStore, CandleStream, Resampler, Selection, TradeAggregator,
    WindowAccessor, MISSING,
};
pub use runtime_config::EngineConfig;
pub use storage::{CandleRepository, ProviderInfo, SqliteCandleStore, SymbolInfo};
pub use types::{Bucket, CandleRecord, Field, Interval, Trade};
