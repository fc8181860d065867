//! Candle storage
//!
//! SQLite-backed store for provider metadata and historical candles, plus the
//! repository trait bucket stores are loaded through.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EngineResult;
use crate::types::{CandleRecord, Interval};

/// Symbol entry of a provider's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair: Option<String>,
}

/// Provider metadata as stored alongside the candles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

/// Source of initial bucket store contents.
pub trait CandleRepository {
    /// All candles for `(provider, symbol, interval)` in ascending time order.
    fn get_candlesticks(
        &self,
        provider: &str,
        symbol: &str,
        interval: Interval,
    ) -> EngineResult<Vec<CandleRecord>>;

    fn get_provider_info(&self, provider: &str) -> EngineResult<Option<ProviderInfo>>;
}

/// Raw payload column: `[t, o, h, l, c, v, v2|null]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Payload(i64, f64, f64, f64, f64, f64, Option<f64>);

impl From<&CandleRecord> for Payload {
    fn from(r: &CandleRecord) -> Self {
        Payload(
            r.start_time,
            r.open.unwrap_or(r.close),
            r.high.unwrap_or(r.close),
            r.low.unwrap_or(r.close),
            r.close,
            r.volume,
            r.quote_volume,
        )
    }
}

impl From<Payload> for CandleRecord {
    fn from(p: Payload) -> Self {
        let Payload(start_time, open, high, low, close, volume, quote_volume) = p;
        CandleRecord {
            start_time,
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close,
            volume,
            quote_volume,
        }
    }
}

/// SQLite candle store keyed by `(timestamp, symbol, interval, provider)`.
pub struct SqliteCandleStore {
    conn: Connection,
}

impl SqliteCandleStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> EngineResult<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        info!(path = %path.display(), "candle database opened");
        Ok(store)
    }

    /// In-memory store (useful for testing).
    pub fn open_in_memory() -> EngineResult<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> EngineResult<()> {
        // Candles may be written before their provider row exists.
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = OFF;

            CREATE TABLE IF NOT EXISTS providers (
                name TEXT UNIQUE NOT NULL,
                info JSON NOT NULL
            );

            CREATE TABLE IF NOT EXISTS candlesticks (
                timestamp INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                provider TEXT NOT NULL REFERENCES providers(name),
                data JSON NOT NULL,
                PRIMARY KEY (timestamp, symbol, interval, provider)
            );

            CREATE INDEX IF NOT EXISTS candlestick_timestamp_idx
            ON candlesticks (timestamp);
            "#,
        )?;
        Ok(())
    }

    pub fn set_provider_info(&self, provider: &str, info: &ProviderInfo) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO providers (name, info) VALUES (?1, ?2)",
            params![provider, serde_json::to_string(info)?],
        )?;
        debug!(provider, symbols = info.symbols.len(), "provider info stored");
        Ok(())
    }

    pub fn add_candlestick(
        &self,
        provider: &str,
        symbol: &str,
        interval: Interval,
        record: &CandleRecord,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO candlesticks (timestamp, symbol, interval, provider, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.start_time,
                symbol,
                interval.as_str(),
                provider,
                serde_json::to_string(&Payload::from(record))?
            ],
        )?;
        Ok(())
    }

    /// Insert or replace a batch of candles in one transaction.
    pub fn add_candlesticks(
        &mut self,
        provider: &str,
        symbol: &str,
        interval: Interval,
        records: &[CandleRecord],
    ) -> EngineResult<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO candlesticks (timestamp, symbol, interval, provider, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.start_time,
                    symbol,
                    interval.as_str(),
                    provider,
                    serde_json::to_string(&Payload::from(record))?
                ])?;
            }
        }
        tx.commit()?;
        debug!(provider, symbol, interval = %interval, count = records.len(), "candles stored");
        Ok(records.len())
    }

    /// The newest stored candle for `(provider, symbol, interval)`.
    pub fn latest_candlestick(
        &self,
        provider: &str,
        symbol: &str,
        interval: Interval,
    ) -> EngineResult<Option<CandleRecord>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM candlesticks
                 WHERE symbol = ?1 AND interval = ?2 AND provider = ?3
                 ORDER BY timestamp DESC LIMIT 1",
                params![symbol, interval.as_str(), provider],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str::<Payload>(&json)?.into())),
            None => Ok(None),
        }
    }
}

impl CandleRepository for SqliteCandleStore {
    fn get_candlesticks(
        &self,
        provider: &str,
        symbol: &str,
        interval: Interval,
    ) -> EngineResult<Vec<CandleRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT data FROM candlesticks
             WHERE symbol = ?1 AND interval = ?2 AND provider = ?3
             ORDER BY timestamp",
        )?;

        let rows = stmt
            .query_map(params![symbol, interval.as_str(), provider], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for json in rows {
            records.push(serde_json::from_str::<Payload>(&json)?.into());
        }
        Ok(records)
    }

    fn get_provider_info(&self, provider: &str) -> EngineResult<Option<ProviderInfo>> {
        let info: Option<String> = self
            .conn
            .query_row(
                "SELECT info FROM providers WHERE name = ?1",
                params![provider],
                |row| row.get(0),
            )
            .optional()?;

        match info {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
