use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use candle_engine::{
    aggregate_trades, resample, Bucket, BucketStore, CandleRecord, Selection, TradeAggregator,
    Trade, WindowAccessor,
};

const DAY: i64 = 86_400;

fn record(start_time: i64, close: f64) -> CandleRecord {
    CandleRecord::ohlcv(start_time, close, close + 2.0, close * 0.5, close + 0.5, 3.0)
}

#[test]
fn readback_is_ascending_regardless_of_insert_order() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut keys: Vec<i64> = (0..40).map(|i| i * 60).collect();
    keys.shuffle(&mut rng);

    let mut store = BucketStore::new("BTCUSDT");
    for &t in &keys {
        assert!(store.append(record(t, 100.0 + t as f64)));
    }

    let back: Vec<&Bucket> = store.iter().collect();
    assert_eq!(back.len(), keys.len());
    for (i, b) in back.iter().enumerate() {
        let t = i as i64 * 60;
        let close = 100.0 + t as f64;
        assert_eq!(b.start_time, t);
        assert_eq!(b.open, close);
        assert_eq!(b.high, close + 2.0);
        assert_eq!(b.low, close * 0.5);
        assert_eq!(b.close, close + 0.5);
        assert_eq!(b.volume, 3.0);
        assert_eq!(b.quote_volume, 3.0 * (close + 0.5));
    }
}

#[test]
fn zero_fields_leave_store_unchanged() {
    let mut store = BucketStore::new("BTCUSDT");
    store.append(record(0, 10.0));
    store.append(record(60, 11.0));
    let before: Vec<Bucket> = store.iter().copied().collect();

    let zeroed = [
        CandleRecord::ohlcv(120, 0.0, 1.0, 1.0, 1.0, 1.0),
        CandleRecord::ohlcv(120, 1.0, 0.0, 1.0, 1.0, 1.0),
        CandleRecord::ohlcv(120, 1.0, 1.0, 0.0, 1.0, 1.0),
        CandleRecord::ohlcv(60, 1.0, 1.0, 1.0, 0.0, 1.0),
        CandleRecord::ohlcv(60, 1.0, 1.0, 1.0, 1.0, 0.0),
        CandleRecord::ohlcv(60, 1.0, 1.0, 1.0, 1.0, 1.0).with_quote_volume(0.0),
    ];
    for rec in zeroed {
        assert!(!store.append(rec));
    }

    assert_eq!(store.len(), 2);
    assert_eq!(store.iter().copied().collect::<Vec<_>>(), before);
}

#[test]
fn aligned_series_resamples_to_itself() {
    let series: Vec<Bucket> = (0..30)
        .map(|i| Bucket::new(i * 300, 10.0 + i as f64, 12.0 + i as f64, 9.0, 11.0, 2.0, Some(22.5)))
        .collect();
    assert_eq!(resample(&series, 300).unwrap(), series);
}

#[test]
fn one_gap_fill_per_skipped_boundary() {
    let series = vec![
        Bucket::new(0, 1.0, 2.0, 0.5, 1.5, 1.0, None),
        Bucket::new(60, 1.5, 2.5, 1.0, 2.0, 1.0, None),
        Bucket::new(360, 3.0, 3.0, 3.0, 3.0, 1.0, None),
    ];
    let out = resample(&series, 60).unwrap();
    let gaps: Vec<&Bucket> = out.iter().filter(|b| b.is_gap_fill()).collect();
    assert_eq!(out.len(), 7);
    assert_eq!(gaps.len(), 4);
    for (i, gap) in gaps.iter().enumerate() {
        assert_eq!(gap.start_time, 120 + 60 * i as i64);
        assert_eq!((gap.open, gap.high, gap.low, gap.close), (2.0, 2.0, 2.0, 2.0));
        assert_eq!(gap.volume, 0.0);
        assert_eq!(gap.quote_volume, 0.0);
    }
}

#[test]
fn stream_and_batch_trade_aggregation_agree() {
    let mut rng = StdRng::seed_from_u64(42);
    for period in [1, 5, 60, 300, DAY] {
        let mut ts = 1_700_000_000_000_i64;
        let trades: Vec<Trade> = (0..500)
            .map(|_| {
                ts += rng.random_range(0..30_000_i64);
                let price = if rng.random_ratio(1, 50) {
                    0.0
                } else {
                    100.0 + rng.random_range(0..1000) as f64 / 100.0
                };
                let qty = 0.01 + rng.random_range(0..100) as f64 / 100.0;
                Trade::new(ts, price, qty, rng.random_bool(0.5))
            })
            .collect();

        let batch = aggregate_trades(&trades, period).unwrap();
        let lazy: Vec<Bucket> = TradeAggregator::new(trades.iter().copied(), period)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lazy, batch, "period {period}");

        for pair in batch.windows(2) {
            assert_eq!(pair[1].start_time - pair[0].start_time, period);
        }
    }
}

#[test]
fn short_history_window_is_left_padded() {
    for k in 0..5_i64 {
        let records = (0..k).map(|i| record(i * 60, 1.0 + i as f64));
        let window = WindowAccessor::new(BucketStore::from_records("BTCUSDT", records, None));
        let w = 8;
        let out = window.close(Selection::Last(w)).unwrap();
        assert_eq!(out.len(), w);
        let pad = w - k as usize;
        assert!(out[..pad].iter().all(|v| v.is_nan()));
        let real: Vec<f64> = (0..k).map(|i| 1.5 + i as f64).collect();
        assert_eq!(&out[pad..], real.as_slice());
    }
}

#[test]
fn eviction_retains_most_recent_keys() {
    let h = 5;
    let mut rng = StdRng::seed_from_u64(99);
    let mut store = BucketStore::new("ETHUSDT").with_max_history(h);
    let mut seen = BTreeSet::new();

    for _ in 0..200 {
        let t = rng.random_range(0..60_i64) * 60;
        store.append(record(t, 1.0));
        seen.insert(t);

        assert!(store.bucket_count() <= h);
        let expected: Vec<i64> = seen.iter().rev().take(h).rev().copied().collect();
        let retained: Vec<i64> = store.iter().map(|b| b.start_time).collect();
        assert_eq!(retained, expected);
    }
}

#[test]
fn one_day_trade_scenario() {
    let trades = [
        Trade::new(1_000, 10.0, 1.0, false),
        Trade::new(2_000, 12.0, 1.0, true),
        Trade::new(90_000, 9.0, 2.0, false),
    ];
    let expected = vec![Bucket::new(0, 10.0, 12.0, 9.0, 9.0, 4.0, Some(40.0))];

    assert_eq!(aggregate_trades(&trades, DAY).unwrap(), expected);
    let lazy: Vec<Bucket> = TradeAggregator::new(trades, DAY)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(lazy, expected);
}
