// =============================================================================
// Resampler — fold fine-grained buckets into a coarser period
// =============================================================================
//
// Walks source buckets in ascending time order and emits one bucket per
// period boundary between the first and last source time:
//
//   open   = open of the first source bucket in the period
//   high   = max of highs,  low = min of lows
//   close  = close of the last source bucket in the period
//   volume / quote_volume = sums
//
// Periods with no source bucket are forward-filled: flat at the previous
// close with zero volume.  A finished bucket is only released once a source
// bucket from a later period has been observed (or the source ends), which
// is what lets the same state machine drive the lazy trade aggregator and
// the async candle stream.
// =============================================================================

use std::iter::Peekable;

use crate::error::{check_period, EngineError, EngineResult};
use crate::types::Bucket;

/// Where the folding state machine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FoldState {
    /// Needs another source bucket before anything can be emitted.
    Accumulating,
    /// A finished (or gap-fill) bucket is ready to be handed out.
    ReadyToEmit,
    /// The source ended or a precondition was violated.
    Exhausted,
}

/// Source-agnostic core shared by [`Resampler`], the lazy trade aggregator
/// and the async candle stream.
#[derive(Debug, Clone)]
pub(crate) struct PeriodFolder {
    period: i64,
    state: FoldState,
    /// Bucket currently being accumulated, already aligned to its period.
    current: Option<Bucket>,
    /// Start of the period following `current`.
    next_boundary: i64,
    /// Source bucket from a later period, observed but not yet folded in.
    held: Option<Bucket>,
    last_source_time: Option<i64>,
}

impl PeriodFolder {
    pub(crate) fn new(period: i64) -> EngineResult<Self> {
        Ok(Self {
            period: check_period(period)?,
            state: FoldState::Accumulating,
            current: None,
            next_boundary: 0,
            held: None,
            last_source_time: None,
        })
    }

    pub(crate) fn period(&self) -> i64 {
        self.period
    }

    pub(crate) fn state(&self) -> FoldState {
        self.state
    }

    fn align(&self, time: i64) -> i64 {
        time.div_euclid(self.period) * self.period
    }

    /// Feed one source bucket.  Only valid while accumulating.
    pub(crate) fn push(&mut self, source: Bucket) -> EngineResult<()> {
        debug_assert_eq!(self.state, FoldState::Accumulating);

        if let Some(previous) = self.last_source_time {
            if source.start_time < previous {
                self.state = FoldState::Exhausted;
                self.current = None;
                return Err(EngineError::NonMonotonic {
                    previous,
                    current: source.start_time,
                });
            }
        }
        self.last_source_time = Some(source.start_time);

        let next_boundary = self.next_boundary;
        match self.current.as_mut() {
            Some(current) if source.start_time < next_boundary => {
                current.merge(&source);
            }
            Some(_) => {
                self.held = Some(source);
                self.state = FoldState::ReadyToEmit;
            }
            None => {
                let start = self.align(source.start_time);
                self.current = Some(Bucket {
                    start_time: start,
                    ..source
                });
                self.next_boundary = start + self.period;
            }
        }
        Ok(())
    }

    /// Release the next finished bucket.  Only yields while `ReadyToEmit`.
    pub(crate) fn take_ready(&mut self) -> Option<Bucket> {
        if self.state != FoldState::ReadyToEmit {
            return None;
        }
        let emitted = self.current.take()?;
        let held = self.held.take()?;

        if held.start_time < self.next_boundary + self.period {
            self.current = Some(Bucket {
                start_time: self.next_boundary,
                ..held
            });
            self.state = FoldState::Accumulating;
        } else {
            // Whole period skipped: carry the close forward and keep the
            // source bucket for a later boundary.
            self.current = Some(Bucket::gap_fill(self.next_boundary, emitted.close));
            self.held = Some(held);
        }
        self.next_boundary += self.period;
        Some(emitted)
    }

    /// Source exhausted: hand out the bucket still being accumulated.
    pub(crate) fn finish(&mut self) -> Option<Bucket> {
        self.state = FoldState::Exhausted;
        self.current.take()
    }
}

// ---------------------------------------------------------------------------
// Resampler
// ---------------------------------------------------------------------------

/// Forward-only walk over ordered source buckets producing buckets at a
/// coarser period.
///
/// Yields `Err(NonMonotonic)` once and then ends if the source goes back in
/// time.  Build a fresh resampler to re-run the walk.
pub struct Resampler<I: Iterator> {
    source: Peekable<I>,
    folder: PeriodFolder,
}

impl<I> Resampler<I>
where
    I: Iterator<Item = Bucket>,
{
    /// Resample `source` to `period` seconds.
    ///
    /// Fails with `EmptySource` when there is nothing to resample and with
    /// `InvalidPeriod` for a non-positive period.
    pub fn new(source: impl IntoIterator<IntoIter = I>, period: i64) -> EngineResult<Self> {
        let folder = PeriodFolder::new(period)?;
        let mut source = source.into_iter().peekable();
        if source.peek().is_none() {
            return Err(EngineError::EmptySource);
        }
        Ok(Self { source, folder })
    }

    pub fn period(&self) -> i64 {
        self.folder.period()
    }

    /// Produce the next resampled bucket, `Ok(None)` once the walk is done.
    pub fn try_next(&mut self) -> EngineResult<Option<Bucket>> {
        loop {
            match self.folder.state() {
                FoldState::ReadyToEmit => return Ok(self.folder.take_ready()),
                FoldState::Exhausted => return Ok(None),
                FoldState::Accumulating => match self.source.next() {
                    Some(bucket) => self.folder.push(bucket)?,
                    None => return Ok(self.folder.finish()),
                },
            }
        }
    }
}

impl<I: Iterator> std::fmt::Debug for Resampler<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resampler")
            .field("folder", &self.folder)
            .finish_non_exhaustive()
    }
}

impl<I> Iterator for Resampler<I>
where
    I: Iterator<Item = Bucket>,
{
    type Item = EngineResult<Bucket>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}

/// Resample an ordered slice of buckets into a vector.
pub fn resample(source: &[Bucket], period: i64) -> EngineResult<Vec<Bucket>> {
    Resampler::new(source.iter().copied(), period)?.collect()
}
