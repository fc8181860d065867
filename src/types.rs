// =============================================================================
// Shared types used across the candle engine
// =============================================================================
//
// `Bucket` is the fixed-shape OHLCV + quote-volume record every component
// passes around.  `CandleRecord` and `Trade` are the two input shapes the
// engine accepts from its data sources.
// =============================================================================

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// One OHLCV record for one time bucket.
///
/// `start_time` is in seconds and aligned to the bucket's period.  Prices and
/// volumes are `f64`; merged volume sums are plain `f64` additions in source
/// order, so aggregates match exact decimal sums only up to rounding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub start_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
}

impl Bucket {
    /// Build a bucket, deriving quote volume from `volume * close` when it is
    /// not supplied.
    pub fn new(
        start_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        quote_volume: Option<f64>,
    ) -> Self {
        Self {
            start_time,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: quote_volume.unwrap_or(volume * close),
        }
    }

    /// Bucket synthesized from a single trade: flat at the trade price.
    ///
    /// Returns `None` when the trade would produce a zero field.
    pub fn from_trade(trade: &Trade) -> Option<Self> {
        let bucket = Self {
            start_time: trade.second(),
            open: trade.price,
            high: trade.price,
            low: trade.price,
            close: trade.price,
            volume: trade.quantity,
            quote_volume: trade.price * trade.quantity,
        };
        bucket.is_valid().then_some(bucket)
    }

    /// Flat, zero-volume bucket carrying `prev_close` forward into a period
    /// with no activity.  Exempt from the zero-field rule.
    pub fn gap_fill(start_time: i64, prev_close: f64) -> Self {
        Self {
            start_time,
            open: prev_close,
            high: prev_close,
            low: prev_close,
            close: prev_close,
            volume: 0.0,
            quote_volume: 0.0,
        }
    }

    /// A bucket is valid only when none of its price or volume fields is
    /// exactly zero.
    pub fn is_valid(&self) -> bool {
        [
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.quote_volume,
        ]
        .iter()
        .all(|v| *v != 0.0)
    }

    /// True for forward-filled buckets (no traded volume).
    pub fn is_gap_fill(&self) -> bool {
        self.volume == 0.0 && self.quote_volume == 0.0
    }

    /// Fold a later source bucket of the same period into this one.
    pub fn merge(&mut self, later: &Bucket) {
        self.high = self.high.max(later.high);
        self.low = self.low.min(later.low);
        self.close = later.close;
        self.volume += later.volume;
        self.quote_volume += later.quote_volume;
    }

    /// Bucket start as a UTC timestamp.
    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.start_time, 0)
    }

    /// The dense row used by the window accessor, in field order
    /// `(time, open, high, low, close, volume, quote_volume)`.
    pub fn to_row(&self) -> [f64; Field::COUNT] {
        [
            self.start_time as f64,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.quote_volume,
        ]
    }
}

// ---------------------------------------------------------------------------
// Candle-shaped input
// ---------------------------------------------------------------------------

/// Candle-shaped input record as delivered by a data source or a storage
/// collaborator.  Open/high/low default to close and quote volume to
/// `volume * close`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    pub start_time: i64,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub quote_volume: Option<f64>,
}

impl CandleRecord {
    /// Record with full OHLC and derived quote volume.
    pub fn ohlcv(start_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            start_time,
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close,
            volume,
            quote_volume: None,
        }
    }

    pub fn with_quote_volume(mut self, quote_volume: f64) -> Self {
        self.quote_volume = Some(quote_volume);
        self
    }

    /// Resolve defaults and apply the zero-field rule.
    pub fn to_bucket(&self) -> Option<Bucket> {
        let bucket = Bucket::new(
            self.start_time,
            self.open.unwrap_or(self.close),
            self.high.unwrap_or(self.close),
            self.low.unwrap_or(self.close),
            self.close,
            self.volume,
            self.quote_volume,
        );
        bucket.is_valid().then_some(bucket)
    }
}

impl From<Bucket> for CandleRecord {
    fn from(b: Bucket) -> Self {
        Self {
            start_time: b.start_time,
            open: Some(b.open),
            high: Some(b.high),
            low: Some(b.low),
            close: b.close,
            volume: b.volume,
            quote_volume: Some(b.quote_volume),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade-shaped input
// ---------------------------------------------------------------------------

/// A single executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Execution time in milliseconds since the epoch.
    pub timestamp_ms: i64,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
}

impl Trade {
    pub fn new(timestamp_ms: i64, price: f64, quantity: f64, is_buyer_maker: bool) -> Self {
        Self {
            timestamp_ms,
            price,
            quantity,
            is_buyer_maker,
        }
    }

    /// The second this trade belongs to.
    pub fn second(&self) -> i64 {
        self.timestamp_ms.div_euclid(1000)
    }
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// Column of the dense window materialization, in guaranteed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Time,
    Open,
    High,
    Low,
    Close,
    Volume,
    QuoteVolume,
}

impl Field {
    pub const COUNT: usize = 7;

    pub const ALL: [Field; Field::COUNT] = [
        Field::Time,
        Field::Open,
        Field::High,
        Field::Low,
        Field::Close,
        Field::Volume,
        Field::QuoteVolume,
    ];

    pub fn column(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// Interval
// ---------------------------------------------------------------------------

/// Exchange sampling interval codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
    ThreeDays,
    OneWeek,
}

impl Interval {
    pub const ALL: [Interval; 14] = [
        Interval::OneMinute,
        Interval::ThreeMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::TwoHours,
        Interval::FourHours,
        Interval::SixHours,
        Interval::EightHours,
        Interval::TwelveHours,
        Interval::OneDay,
        Interval::ThreeDays,
        Interval::OneWeek,
    ];

    /// Interval length in seconds.
    pub fn seconds(self) -> i64 {
        const MINUTE: i64 = 60;
        const HOUR: i64 = 60 * MINUTE;
        const DAY: i64 = 24 * HOUR;
        match self {
            Self::OneMinute => MINUTE,
            Self::ThreeMinutes => 3 * MINUTE,
            Self::FiveMinutes => 5 * MINUTE,
            Self::FifteenMinutes => 15 * MINUTE,
            Self::ThirtyMinutes => 30 * MINUTE,
            Self::OneHour => HOUR,
            Self::TwoHours => 2 * HOUR,
            Self::FourHours => 4 * HOUR,
            Self::SixHours => 6 * HOUR,
            Self::EightHours => 8 * HOUR,
            Self::TwelveHours => 12 * HOUR,
            Self::OneDay => DAY,
            Self::ThreeDays => 3 * DAY,
            Self::OneWeek => 7 * DAY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::SixHours => "6h",
            Self::EightHours => "8h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
            Self::ThreeDays => "3d",
            Self::OneWeek => "1w",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        Self::ALL
            .into_iter()
            .find(|iv| iv.as_str() == s.trim())
            .ok_or_else(|| EngineError::UnknownInterval(s.to_string()))
    }
}

impl TryFrom<String> for Interval {
    type Error = EngineError;

    fn try_from(s: String) -> EngineResult<Self> {
        s.parse()
    }
}

impl From<Interval> for String {
    fn from(iv: Interval) -> Self {
        iv.as_str().to_string()
    }
}
