// =============================================================================
// Window Accessor — fixed-width numeric slices over a bucket store
// =============================================================================
//
// Materializes the (optionally resampled) series once into seven dense f64
// columns (time, open, high, low, close, volume, quote_volume) and serves
// slices from that cache.  The cache remembers the store version it was
// built from and is rebuilt on the first read after any store mutation or
// sampling change.
//
// Right-aligned windows (`Selection::Last(w)` or a range with a negative
// start) are left-padded with NaN so they always have the requested width.
// =============================================================================

use std::cell::{Ref, RefCell};

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::market_data::bucket_store::BucketStore;
use crate::types::{Bucket, Field};

/// Value used for rows that fall before the start of available history.
pub const MISSING: f64 = f64::NAN;

/// Which rows of a column to return.
///
/// Negative indices count from the end, as in Python-style slicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    /// The whole column.
    #[default]
    All,
    /// The last `w` rows, left-padded with [`MISSING`] to width `w`.
    Last(usize),
    /// A half-open `[start, end)` range.  A negative `start` makes it a
    /// right-aligned window of width `-start`, padded like `Last`.
    Range {
        start: Option<isize>,
        end: Option<isize>,
    },
    /// A single row.
    At(isize),
}

impl Selection {
    pub fn range(start: Option<isize>, end: Option<isize>) -> Self {
        Selection::Range { start, end }
    }
}

/// Dense column-major copy of the series.
#[derive(Debug, Clone, Default)]
struct Materialized {
    /// Store version this copy was built from; `None` until first built.
    version: Option<u64>,
    rows: usize,
    columns: [Vec<f64>; Field::COUNT],
}

impl Materialized {
    fn build(store: &BucketStore) -> EngineResult<Self> {
        let series: Vec<Bucket> = if store.is_empty() {
            Vec::new()
        } else {
            store.candles()?
        };
        let mut columns: [Vec<f64>; Field::COUNT] =
            std::array::from_fn(|_| Vec::with_capacity(series.len()));
        for bucket in &series {
            for (column, value) in columns.iter_mut().zip(bucket.to_row()) {
                column.push(value);
            }
        }
        Ok(Self {
            version: Some(store.version()),
            rows: series.len(),
            columns,
        })
    }
}

/// Read-only numeric view over a [`BucketStore`] with a cached dense
/// materialization.
///
/// Mutate the underlying store through [`store_mut`](Self::store_mut); the
/// next read notices the version change and rebuilds.
#[derive(Debug)]
pub struct WindowAccessor {
    store: BucketStore,
    cache: RefCell<Materialized>,
}

impl WindowAccessor {
    pub fn new(store: BucketStore) -> Self {
        Self {
            store,
            cache: RefCell::new(Materialized::default()),
        }
    }

    pub fn store(&self) -> &BucketStore {
        &self.store
    }

    /// Mutable access to the store.  Drops the cache, since the store may
    /// be replaced wholesale by one with an unrelated version count.
    pub fn store_mut(&mut self) -> &mut BucketStore {
        self.cache.get_mut().version = None;
        &mut self.store
    }

    pub fn into_store(self) -> BucketStore {
        self.store
    }

    /// Change the target period; `None` serves the stored buckets as-is.
    pub fn resample(&mut self, period: Option<i64>) -> EngineResult<()> {
        self.store.set_sampling(period)
    }

    /// Number of materialized rows.
    pub fn rows(&self) -> EngineResult<usize> {
        Ok(self.materialized()?.rows)
    }

    /// Whether the cache matches the current store contents.
    pub fn is_cached(&self) -> bool {
        self.cache.borrow().version == Some(self.store.version())
    }

    fn materialized(&self) -> EngineResult<Ref<'_, Materialized>> {
        if !self.is_cached() {
            let built = Materialized::build(&self.store)?;
            debug!(
                symbol = %self.store.symbol(),
                rows = built.rows,
                version = self.store.version(),
                "window cache rebuilt"
            );
            *self.cache.borrow_mut() = built;
        }
        Ok(self.cache.borrow())
    }

    /// Dense rows `(time, open, high, low, close, volume, quote_volume)`.
    pub fn matrix(&self) -> EngineResult<Vec<[f64; Field::COUNT]>> {
        let m = self.materialized()?;
        Ok((0..m.rows)
            .map(|i| std::array::from_fn(|c| m.columns[c][i]))
            .collect())
    }

    /// Rows of `field` picked by `selection`.
    pub fn field(&self, field: Field, selection: Selection) -> EngineResult<Vec<f64>> {
        let m = self.materialized()?;
        select(&m.columns[field.column()], selection)
    }

    pub fn time(&self, selection: Selection) -> EngineResult<Vec<f64>> {
        self.field(Field::Time, selection)
    }

    pub fn open(&self, selection: Selection) -> EngineResult<Vec<f64>> {
        self.field(Field::Open, selection)
    }

    pub fn high(&self, selection: Selection) -> EngineResult<Vec<f64>> {
        self.field(Field::High, selection)
    }

    pub fn low(&self, selection: Selection) -> EngineResult<Vec<f64>> {
        self.field(Field::Low, selection)
    }

    pub fn close(&self, selection: Selection) -> EngineResult<Vec<f64>> {
        self.field(Field::Close, selection)
    }

    pub fn volume(&self, selection: Selection) -> EngineResult<Vec<f64>> {
        self.field(Field::Volume, selection)
    }

    pub fn quote_volume(&self, selection: Selection) -> EngineResult<Vec<f64>> {
        self.field(Field::QuoteVolume, selection)
    }
}

// ---------------------------------------------------------------------------
// Slicing
// ---------------------------------------------------------------------------

/// Resolve a possibly negative index against `len`, clamped to `[0, len]`.
fn clamp_index(index: isize, len: usize) -> usize {
    if index < 0 {
        len.saturating_sub(index.unsigned_abs())
    } else {
        (index as usize).min(len)
    }
}

fn select(column: &[f64], selection: Selection) -> EngineResult<Vec<f64>> {
    let len = column.len();
    match selection {
        Selection::All => Ok(column.to_vec()),
        Selection::Last(width) => {
            let padded = pad_left(column, width);
            Ok(padded[padded.len() - width..].to_vec())
        }
        Selection::Range {
            start: Some(start),
            end,
        } if start < 0 => {
            let width = start.unsigned_abs();
            let padded = pad_left(column, width);
            let n = padded.len();
            let end = end.map_or(n, |e| clamp_index(e, n));
            if n - width >= end {
                return Ok(Vec::new());
            }
            Ok(padded[n - width..end].to_vec())
        }
        Selection::Range { start, end } => {
            let start = start.map_or(0, |s| clamp_index(s, len));
            let end = end.map_or(len, |e| clamp_index(e, len));
            if start >= end {
                return Ok(Vec::new());
            }
            Ok(column[start..end].to_vec())
        }
        Selection::At(index) => {
            let resolved = if index < 0 {
                len.checked_sub(index.unsigned_abs())
            } else {
                Some(index as usize).filter(|i| *i < len)
            };
            resolved
                .map(|i| vec![column[i]])
                .ok_or(EngineError::IndexOutOfRange { index, len })
        }
    }
}

/// `column` preceded by enough [`MISSING`] values to reach `width` rows.
fn pad_left(column: &[f64], width: usize) -> Vec<f64> {
    let missing = width.saturating_sub(column.len());
    let mut out = Vec::with_capacity(column.len() + missing);
    out.resize(missing, MISSING);
    out.extend_from_slice(column);
    out
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CandleRecord;

    fn store_with(closes: &[f64]) -> BucketStore {
        let records = closes
            .iter()
            .enumerate()
            .map(|(i, c)| CandleRecord::ohlcv(i as i64 * 60, *c, c + 1.0, c - 0.5, *c, 2.0));
        BucketStore::from_records("BTCUSDT", records, None)
    }

    #[test]
    fn full_column_without_selection() {
        let w = WindowAccessor::new(store_with(&[1.0, 2.0, 3.0]));
        assert_eq!(w.close(Selection::All).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(w.time(Selection::All).unwrap(), vec![0.0, 60.0, 120.0]);
        assert_eq!(w.quote_volume(Selection::All).unwrap(), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn short_history_is_left_padded() {
        let w = WindowAccessor::new(store_with(&[1.0, 2.0, 3.0]));
        let out = w.close(Selection::Last(5)).unwrap();
        assert_eq!(out.len(), 5);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_eq!(&out[2..], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn long_history_returns_last_rows() {
        let w = WindowAccessor::new(store_with(&[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(w.close(Selection::Last(2)).unwrap(), vec![3.0, 4.0]);
        assert_eq!(
            w.close(Selection::range(Some(-2), None)).unwrap(),
            vec![3.0, 4.0]
        );
    }

    #[test]
    fn negative_start_with_end_pads_then_slices() {
        let w = WindowAccessor::new(store_with(&[1.0, 2.0]));
        let out = w.close(Selection::range(Some(-4), Some(-1))).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(out[2], 1.0);
    }

    #[test]
    fn general_range_and_index_do_not_pad() {
        let w = WindowAccessor::new(store_with(&[1.0, 2.0, 3.0]));
        assert_eq!(w.open(Selection::range(Some(1), None)).unwrap(), vec![2.0, 3.0]);
        assert_eq!(w.open(Selection::range(Some(0), Some(10))).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(w.high(Selection::At(-1)).unwrap(), vec![4.0]);
        assert_eq!(w.low(Selection::At(0)).unwrap(), vec![0.5]);
        assert!(matches!(
            w.low(Selection::At(3)),
            Err(EngineError::IndexOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn empty_store_pads_entirely() {
        let w = WindowAccessor::new(BucketStore::new("BTCUSDT").with_sampling(300).unwrap());
        assert_eq!(w.rows().unwrap(), 0);
        let out = w.volume(Selection::Last(3)).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn cache_is_reused_until_store_changes() {
        let mut w = WindowAccessor::new(store_with(&[1.0, 2.0]));
        assert!(!w.is_cached());
        w.close(Selection::All).unwrap();
        assert!(w.is_cached());
        w.open(Selection::Last(1)).unwrap();
        assert!(w.is_cached());

        w.store_mut().append(CandleRecord::ohlcv(120, 3.0, 3.0, 3.0, 3.0, 1.0));
        assert!(!w.is_cached());
        assert_eq!(w.close(Selection::All).unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(w.is_cached());
    }

    #[test]
    fn replacing_the_store_drops_the_cache() {
        let mut w = WindowAccessor::new(store_with(&[1.0, 2.0]));
        assert_eq!(w.close(Selection::All).unwrap(), vec![1.0, 2.0]);

        let replacement = store_with(&[7.0, 8.0]);
        assert_eq!(replacement.version(), w.store().version());
        *w.store_mut() = replacement;

        assert!(!w.is_cached());
        assert_eq!(w.close(Selection::All).unwrap(), vec![7.0, 8.0]);
    }

    #[test]
    fn changing_period_rebuilds_resampled_series() {
        let mut w = WindowAccessor::new(store_with(&[1.0, 2.0, 3.0, 4.0]));
        assert_eq!(w.rows().unwrap(), 4);

        w.resample(Some(120)).unwrap();
        assert!(!w.is_cached());
        assert_eq!(w.close(Selection::All).unwrap(), vec![2.0, 4.0]);
        assert_eq!(w.volume(Selection::All).unwrap(), vec![4.0, 4.0]);

        w.resample(None).unwrap();
        assert_eq!(w.rows().unwrap(), 4);
    }

    #[test]
    fn matrix_rows_follow_field_order() {
        let w = WindowAccessor::new(store_with(&[5.0]));
        let m = w.matrix().unwrap();
        assert_eq!(m, vec![[0.0, 5.0, 6.0, 4.5, 5.0, 2.0, 10.0]]);
    }
}
