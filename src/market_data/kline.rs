// =============================================================================
// Kline ingestion — Binance kline rows and dump files into bucket stores
// =============================================================================
//
// REST klines arrive as arrays of mixed numbers and numeric strings:
//   [0] openTime (ms), [1] open, [2] high, [3] low, [4] close, [5] volume,
//   [6] closeTime, [7] quoteAssetVolume, [8] numberOfTrades, ...
//
// A dump file is the exchange-info document with a `klines` array attached
// to each symbol that has history.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::market_data::bucket_store::BucketStore;
use crate::types::CandleRecord;

/// Binance sends numeric values as JSON strings inside kline rows.
fn parse_string_f64(val: &serde_json::Value, name: &str) -> EngineResult<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| EngineError::malformed(format!("failed to parse {name} as f64: {s} ({e})"))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EngineError::malformed(format!("field {name} is not a valid f64"))),
        _ => Err(EngineError::malformed(format!(
            "field {name} has unexpected JSON type"
        ))),
    }
}

/// Convert one kline row into a candle record keyed by its open time in
/// seconds.  The quote volume column is optional.
pub fn record_from_kline(row: &serde_json::Value) -> EngineResult<CandleRecord> {
    let arr = row
        .as_array()
        .ok_or_else(|| EngineError::malformed("kline entry is not an array"))?;
    if arr.len() < 6 {
        return Err(EngineError::malformed(format!(
            "kline entry has {} elements, expected at least 6",
            arr.len()
        )));
    }

    let open_time_ms = arr[0]
        .as_i64()
        .ok_or_else(|| EngineError::malformed("open time is not an integer"))?;

    let record = CandleRecord::ohlcv(
        open_time_ms.div_euclid(1000),
        parse_string_f64(&arr[1], "open")?,
        parse_string_f64(&arr[2], "high")?,
        parse_string_f64(&arr[3], "low")?,
        parse_string_f64(&arr[4], "close")?,
        parse_string_f64(&arr[5], "volume")?,
    );

    match arr.get(7) {
        Some(q) => Ok(record.with_quote_volume(parse_string_f64(q, "quote_volume")?)),
        None => Ok(record),
    }
}

/// One symbol entry of a kline dump.
#[derive(Debug, Clone, Deserialize)]
pub struct DumpSymbol {
    pub symbol: String,
    #[serde(default)]
    pub pair: Option<String>,
    #[serde(default)]
    pub klines: Vec<serde_json::Value>,
}

/// Exchange-info document with per-symbol kline history.
#[derive(Debug, Clone, Deserialize)]
pub struct KlineDump {
    #[serde(default)]
    pub symbols: Vec<DumpSymbol>,
}

impl KlineDump {
    /// Read a dump from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read kline dump from {}", path.display()))?;
        let dump: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse kline dump from {}", path.display()))?;
        info!(
            path = %path.display(),
            symbols = dump.symbols.len(),
            "kline dump loaded"
        );
        Ok(dump)
    }

    /// Parsed records for every symbol that has klines.  Malformed rows are
    /// skipped with a warning.
    pub fn records(&self) -> Vec<(String, Vec<CandleRecord>)> {
        self.symbols
            .iter()
            .filter(|s| !s.klines.is_empty())
            .map(|s| {
                let records: Vec<CandleRecord> = s
                    .klines
                    .iter()
                    .filter_map(|row| match record_from_kline(row) {
                        Ok(rec) => Some(rec),
                        Err(e) => {
                            warn!(symbol = %s.symbol, error = %e, "skipping malformed kline");
                            None
                        }
                    })
                    .collect();
                debug!(symbol = %s.symbol, klines = records.len(), "symbol klines parsed");
                (s.symbol.clone(), records)
            })
            .collect()
    }

    /// One bucket store per symbol with history.
    pub fn stores(&self, max_history: Option<usize>) -> Vec<BucketStore> {
        self.records()
            .into_iter()
            .map(|(symbol, records)| BucketStore::from_records(symbol, records, max_history))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
