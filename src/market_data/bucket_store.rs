use std::collections::{HashMap, VecDeque};
use std::ops::{Bound, RangeBounds};

use tracing::debug;

use crate::error::{check_period, EngineResult};
use crate::market_data::resampler::Resampler;
use crate::storage::CandleRepository;
use crate::types::{Bucket, CandleRecord, Interval, Trade};

// ---------------------------------------------------------------------------
// BucketStore -- time-indexed buckets for one symbol
// ---------------------------------------------------------------------------

/// Mutable, time-indexed container of buckets for a single symbol.
///
/// Buckets are keyed by `start_time`.  Keys are kept in an explicit ordered
/// index that is re-sorted whenever a new key arrives out of order, and the
/// store is trimmed from the oldest end when `max_history` is exceeded.
///
/// Single owner, single writer: share one store per symbol, never across
/// threads.
#[derive(Debug, Clone)]
pub struct BucketStore {
    symbol: String,
    buckets: HashMap<i64, Bucket>,
    sorted_times: VecDeque<i64>,
    max_history: Option<usize>,
    sampling: Option<i64>,
    /// Bumped by every mutation; readers compare it to detect stale caches.
    version: u64,
}

impl BucketStore {
    /// Create an empty, unbounded, unsampled store.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            buckets: HashMap::new(),
            sorted_times: VecDeque::new(),
            max_history: None,
            sampling: None,
            version: 0,
        }
    }

    /// Keep at most `max_history` buckets, evicting the oldest first.
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = Some(max_history);
        self.evict();
        self
    }

    /// Serve the series resampled to `period` seconds.
    pub fn with_sampling(mut self, period: i64) -> EngineResult<Self> {
        self.set_sampling(Some(period))?;
        Ok(self)
    }

    /// Build a store from an initial collection of raw records.
    pub fn from_records<R>(
        symbol: impl Into<String>,
        records: impl IntoIterator<Item = R>,
        max_history: Option<usize>,
    ) -> Self
    where
        R: Into<CandleRecord>,
    {
        let mut store = Self::new(symbol);
        store.max_history = max_history;
        for record in records {
            store.append(record);
        }
        store
    }

    /// Build a store from the candles a storage collaborator holds for
    /// `(provider, symbol, interval)`.
    pub fn load(
        repo: &impl CandleRepository,
        provider: &str,
        symbol: &str,
        interval: Interval,
        max_history: Option<usize>,
    ) -> EngineResult<Self> {
        let records = repo.get_candlesticks(provider, symbol, interval)?;
        let fetched = records.len();
        let store = Self::from_records(symbol, records, max_history);
        debug!(
            provider,
            symbol,
            interval = %interval,
            fetched,
            stored = store.bucket_count(),
            "bucket store loaded from repository"
        );
        Ok(store)
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Insert a record.  A new key joins the ordered index (re-sorting it if
    /// the key arrived out of order); an existing key is overwritten.
    ///
    /// Returns whether the record is held afterwards: `false` for records
    /// with a zero price or volume field, and for keys evicted straight away
    /// by the history bound.
    pub fn append(&mut self, record: impl Into<CandleRecord>) -> bool {
        let Some(bucket) = self.validate(record.into()) else {
            return false;
        };
        self.store(bucket)
    }

    /// Replace the still-open bucket at the record's key (last write wins).
    /// Falls back to [`append`](Self::append) for unseen keys.
    pub fn update(&mut self, record: impl Into<CandleRecord>) -> bool {
        let Some(bucket) = self.validate(record.into()) else {
            return false;
        };
        match self.buckets.get_mut(&bucket.start_time) {
            Some(existing) => {
                *existing = bucket;
                self.version += 1;
                true
            }
            None => self.store(bucket),
        }
    }

    /// Record a trade in the bucket of the second it happened in.  The trade
    /// overwrites whatever that second held: the bucket is flat at the trade
    /// price, not a true intra-second OHLC.
    pub fn append_trade(&mut self, trade: &Trade) -> bool {
        match Bucket::from_trade(trade) {
            Some(bucket) => self.update(bucket),
            None => {
                debug!(
                    symbol = %self.symbol,
                    timestamp_ms = trade.timestamp_ms,
                    "dropping zero-valued trade"
                );
                false
            }
        }
    }

    fn validate(&self, record: CandleRecord) -> Option<Bucket> {
        let bucket = record.to_bucket();
        if bucket.is_none() {
            debug!(
                symbol = %self.symbol,
                start_time = record.start_time,
                "dropping record with zero-valued field"
            );
        }
        bucket
    }

    /// Insert or overwrite `bucket`; `false` if the history bound evicted it.
    fn store(&mut self, bucket: Bucket) -> bool {
        let key = bucket.start_time;
        if self.buckets.insert(key, bucket).is_none() {
            self.sorted_times.push_back(key);
            let n = self.sorted_times.len();
            if n > 1 && self.sorted_times[n - 1] < self.sorted_times[n - 2] {
                self.sorted_times.make_contiguous().sort_unstable();
                debug!(symbol = %self.symbol, key, "out-of-order key, index re-sorted");
            }
            self.evict();
        }
        self.version += 1;
        self.buckets.contains_key(&key)
    }

    fn evict(&mut self) {
        let Some(max) = self.max_history else {
            return;
        };
        while self.buckets.len() > max {
            match self.sorted_times.pop_front() {
                Some(oldest) => {
                    self.buckets.remove(&oldest);
                    debug!(symbol = %self.symbol, evicted = oldest, "history bound reached");
                }
                None => break,
            }
        }
    }

    /// Set or clear the target sampling period.  Changing it invalidates any
    /// cached materialization.
    pub fn set_sampling(&mut self, period: Option<i64>) -> EngineResult<()> {
        if let Some(p) = period {
            check_period(p)?;
        }
        if self.sampling != period {
            self.sampling = period;
            self.version += 1;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn max_history(&self) -> Option<usize> {
        self.max_history
    }

    pub fn sampling(&self) -> Option<i64> {
        self.sampling
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of buckets actually held, regardless of sampling.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Series length.
    ///
    /// Unsampled: the number of stored buckets.  Sampled: the number of
    /// period boundaries spanned, `last / period - first / period`.  That is
    /// one less than the number of buckets a resample emits for the same
    /// span, and callers sizing windows from it rely on that.
    pub fn len(&self) -> usize {
        match (self.sampling, self.sorted_times.front(), self.sorted_times.back()) {
            (Some(period), Some(first), Some(last)) => {
                (last.div_euclid(period) - first.div_euclid(period)) as usize
            }
            _ => self.buckets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn contains(&self, start_time: i64) -> bool {
        self.buckets.contains_key(&start_time)
    }

    /// Stored bucket at `start_time`, if any.
    pub fn at_time(&self, start_time: i64) -> Option<&Bucket> {
        self.buckets.get(&start_time)
    }

    /// Stored buckets in ascending time order (ignores sampling).
    pub fn iter(&self) -> impl Iterator<Item = &Bucket> + '_ {
        self.sorted_times.iter().filter_map(|t| self.buckets.get(t))
    }

    pub fn first(&self) -> Option<&Bucket> {
        self.sorted_times.front().and_then(|t| self.buckets.get(t))
    }

    pub fn last(&self) -> Option<&Bucket> {
        self.sorted_times.back().and_then(|t| self.buckets.get(t))
    }

    /// Resample the current contents to `period` seconds.
    pub fn resample(&self, period: i64) -> EngineResult<Resampler<impl Iterator<Item = Bucket> + '_>> {
        Resampler::new(self.iter().copied(), period)
    }

    /// The full ordered series: stored buckets when unsampled, the resampled
    /// walk when sampled.
    pub fn candles(&self) -> EngineResult<Vec<Bucket>> {
        match self.sampling {
            None => Ok(self.iter().copied().collect()),
            Some(period) => self.resample(period)?.collect(),
        }
    }

    /// Bucket at `index` of the ordered series (see [`candles`](Self::candles)).
    pub fn get(&self, index: usize) -> Option<Bucket> {
        match self.sampling {
            None => self
                .sorted_times
                .get(index)
                .and_then(|t| self.buckets.get(t))
                .copied(),
            Some(period) => self.resample(period).ok()?.nth(index)?.ok(),
        }
    }

    /// Positional slice of the ordered series.  Out-of-range bounds are
    /// clamped; an empty store yields an empty slice.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Vec<Bucket> {
        let series = if self.is_empty() {
            Vec::new()
        } else {
            self.candles().unwrap_or_default()
        };
        let len = series.len();
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.saturating_add(1),
            Bound::Unbounded => 0,
        }
        .min(len);
        let end = match range.end_bound() {
            Bound::Included(&e) => e.saturating_add(1),
            Bound::Excluded(&e) => e,
            Bound::Unbounded => len,
        }
        .min(len);
        if start >= end {
            return Vec::new();
        }
        series[start..end].to_vec()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(start_time: i64, close: f64) -> CandleRecord {
        CandleRecord::ohlcv(start_time, close, close + 1.0, close * 0.5, close, 10.0)
    }

    fn times(store: &BucketStore) -> Vec<i64> {
        store.iter().map(|b| b.start_time).collect()
    }

    #[test]
    fn iteration_is_ascending_regardless_of_insert_order() {
        let mut store = BucketStore::new("BTCUSDT");
        for t in [300, 60, 240, 0, 120, 180] {
            assert!(store.append(record(t, 100.0 + t as f64)));
        }
        assert_eq!(times(&store), vec![0, 60, 120, 180, 240, 300]);
        for b in store.iter() {
            assert_eq!(b.close, 100.0 + b.start_time as f64);
        }
    }

    #[test]
    fn zero_field_records_leave_store_untouched() {
        let mut store = BucketStore::new("BTCUSDT");
        store.append(record(0, 100.0));
        let version = store.version();

        assert!(!store.append(CandleRecord::ohlcv(60, 0.0, 1.0, 1.0, 1.0, 1.0)));
        assert!(!store.append(CandleRecord::ohlcv(60, 1.0, 1.0, 1.0, 1.0, 0.0)));
        assert!(!store.update(CandleRecord::ohlcv(0, 1.0, 1.0, 1.0, 1.0, 1.0).with_quote_volume(0.0)));

        assert_eq!(store.len(), 1);
        assert_eq!(store.version(), version);
        assert_eq!(store.first().unwrap().close, 100.0);
    }

    #[test]
    fn eviction_keeps_most_recent() {
        let mut store = BucketStore::new("ETHUSDT").with_max_history(3);
        for t in [0, 60, 120, 180, 240] {
            store.append(record(t, 1.0));
            assert!(store.bucket_count() <= 3);
        }
        assert_eq!(times(&store), vec![120, 180, 240]);

        // An older key than everything retained is evicted straight away.
        assert!(!store.append(record(30, 1.0)));
        assert_eq!(times(&store), vec![120, 180, 240]);

        // An out-of-order key inside the window evicts the oldest.
        assert!(store.append(record(150, 1.0)));
        assert_eq!(times(&store), vec![150, 180, 240]);
    }

    #[test]
    fn zero_history_bound_holds_nothing() {
        let mut store = BucketStore::new("BTCUSDT").with_max_history(0);
        assert!(!store.append(record(0, 2.0)));
        assert!(!store.update(record(60, 2.0)));
        assert!(!store.append_trade(&Trade::new(5_000, 2.0, 1.0, false)));
        assert_eq!(store.bucket_count(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn append_existing_key_overwrites_without_growing() {
        let mut store = BucketStore::new("BTCUSDT").with_max_history(2);
        store.append(record(0, 1.0));
        store.append(record(60, 2.0));
        store.append(record(0, 5.0));
        assert_eq!(times(&store), vec![0, 60]);
        assert_eq!(store.at_time(0).unwrap().close, 5.0);
    }

    #[test]
    fn update_replaces_whole_bucket() {
        let mut store = BucketStore::new("BTCUSDT");
        store.append(CandleRecord::ohlcv(60, 10.0, 15.0, 5.0, 12.0, 3.0));
        store.update(CandleRecord::ohlcv(60, 11.0, 11.5, 10.5, 11.0, 1.0));
        let b = store.at_time(60).unwrap();
        assert_eq!(b.high, 11.5);
        assert_eq!(b.low, 10.5);
        assert_eq!(b.volume, 1.0);
        assert_eq!(b.quote_volume, 11.0);

        // Unseen key behaves like append.
        store.update(record(0, 9.0));
        assert_eq!(times(&store), vec![0, 60]);
    }

    #[test]
    fn trades_in_same_second_last_one_wins() {
        let mut store = BucketStore::new("BTCUSDT");
        assert!(store.append_trade(&Trade::new(5_100, 10.0, 1.0, false)));
        assert!(store.append_trade(&Trade::new(5_900, 11.0, 2.0, true)));
        assert!(store.append_trade(&Trade::new(4_000, 9.0, 1.0, false)));
        assert!(!store.append_trade(&Trade::new(6_000, 9.0, 0.0, false)));

        assert_eq!(times(&store), vec![4, 5]);
        let b = store.at_time(5).unwrap();
        assert_eq!((b.open, b.high, b.low, b.close), (11.0, 11.0, 11.0, 11.0));
        assert_eq!(b.volume, 2.0);
        assert_eq!(b.quote_volume, 22.0);
    }

    #[test]
    fn sampled_length_counts_boundaries_spanned() {
        let mut store = BucketStore::new("BTCUSDT");
        for t in [0, 60, 120, 180, 240, 300] {
            store.append(record(t, 1.0));
        }
        assert_eq!(store.len(), 6);

        store.set_sampling(Some(120)).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.candles().unwrap().len(), 3);
        assert_eq!(store.bucket_count(), 6);
    }

    #[test]
    fn sampled_positional_access_uses_resampled_series() {
        let mut store = BucketStore::new("BTCUSDT");
        for t in [0, 60, 120, 180] {
            store.append(record(t, 1.0 + t as f64));
        }
        store.set_sampling(Some(120)).unwrap();
        let second = store.get(1).unwrap();
        assert_eq!(second.start_time, 120);
        assert_eq!(second.close, 181.0);
        assert!(store.get(2).is_none());
        assert_eq!(store.slice(..1).len(), 1);
        assert_eq!(store.slice(1..10)[0].start_time, 120);
    }

    #[test]
    fn version_moves_on_every_mutation() {
        let mut store = BucketStore::new("BTCUSDT");
        let v0 = store.version();
        store.append(record(0, 1.0));
        let v1 = store.version();
        assert!(v1 > v0);
        store.update(record(0, 2.0));
        let v2 = store.version();
        assert!(v2 > v1);
        store.set_sampling(Some(60)).unwrap();
        let v3 = store.version();
        assert!(v3 > v2);
        store.set_sampling(Some(60)).unwrap();
        assert_eq!(store.version(), v3);
        assert!(store.set_sampling(Some(0)).is_err());
    }

    #[test]
    fn empty_store_reports_nothing() {
        let store = BucketStore::new("BTCUSDT").with_sampling(60).unwrap();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert!(store.get(0).is_none());
        assert!(store.slice(..).is_empty());
        assert!(store.candles().is_err());
    }
}
