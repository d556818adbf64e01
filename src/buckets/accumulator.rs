use chrono::{DateTime, Utc};

use super::BucketCapacity;
use crate::error::CandleError;
use crate::models::{Bucket, Candle};

/// Tolerance (percent) for treating an accumulated fill or a leftover body as zero.
/// Fixed for every run so results are reproducible.
pub const FILL_EPSILON: f64 = 1e-9;

/// Bucket that is still accepting contributions
#[derive(Debug, Clone, PartialEq)]
struct OpenBucket {
    fill: f64,
    open_price: f64,
    close_price: f64,
    start_time: DateTime<Utc>,
}

impl OpenBucket {
    fn start(open_price: f64, at: DateTime<Utc>) -> Self {
        Self {
            fill: 0.0,
            open_price,
            close_price: open_price,
            start_time: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    /// Nothing accumulated yet in this run
    Empty,
    Filling(OpenBucket),
    /// Last bucket was sealed; the next one opens at its close
    Sealed { handoff_price: f64 },
    /// Last bucket drained back to zero; the next one opens at the cancel price
    Cancelled { handoff_price: f64 },
}

/// Public view of the accumulator's phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Empty,
    Filling,
    Sealed,
    Cancelled,
}

/// What happened while consuming one candle
#[derive(Debug, Clone, PartialEq)]
pub enum BucketEvent {
    Sealed(Bucket),
    Cancelled {
        handoff_price: f64,
        at: DateTime<Utc>,
    },
}

/// Converts an ordered candle stream into fixed-magnitude buckets.
///
/// Each candle contributes its signed body percentage. A bucket is sealed once
/// `|fill|` has reached capacity and more signed movement arrives; a bucket that
/// lands exactly on zero is cancelled without being emitted, while one that is
/// pushed through zero keeps filling in the new direction. Bucket
/// boundaries are continuous in price: every new bucket opens at the previous
/// bucket's close (or at the cancellation price).
#[derive(Debug, Clone)]
pub struct BucketAccumulator {
    capacity: f64,
    next_id: u64,
    phase: Phase,
    last_timestamp: Option<DateTime<Utc>>,
    sealed: Vec<Bucket>,
}

impl BucketAccumulator {
    pub fn new(capacity: BucketCapacity) -> Self {
        Self {
            capacity: capacity.pct(),
            next_id: 0,
            phase: Phase::Empty,
            last_timestamp: None,
            sealed: Vec::new(),
        }
    }

    pub fn state(&self) -> AccumulatorState {
        match self.phase {
            Phase::Empty => AccumulatorState::Empty,
            Phase::Filling(_) => AccumulatorState::Filling,
            Phase::Sealed { .. } => AccumulatorState::Sealed,
            Phase::Cancelled { .. } => AccumulatorState::Cancelled,
        }
    }

    /// Signed fill of the open bucket, zero when none is open
    pub fn current_fill(&self) -> f64 {
        match &self.phase {
            Phase::Filling(bucket) => bucket.fill,
            _ => 0.0,
        }
    }

    /// Price the next bucket will open at, if one is pending
    pub fn handoff_price(&self) -> Option<f64> {
        match self.phase {
            Phase::Sealed { handoff_price } | Phase::Cancelled { handoff_price } => {
                Some(handoff_price)
            }
            _ => None,
        }
    }

    /// Buckets sealed so far, oldest first
    pub fn sealed(&self) -> &[Bucket] {
        &self.sealed
    }

    /// Feed the next candle.
    ///
    /// A malformed or out-of-order candle is rejected and leaves the
    /// accumulator untouched.
    pub fn push(&mut self, candle: &Candle) -> Result<Vec<BucketEvent>, CandleError> {
        candle.validate()?;
        if let Some(previous) = self.last_timestamp {
            if candle.timestamp <= previous {
                return Err(CandleError::OutOfOrder {
                    previous,
                    current: candle.timestamp,
                });
            }
        }
        self.last_timestamp = Some(candle.timestamp);

        let body_pct = candle.body_pct();
        if body_pct == 0.0 {
            return Ok(Vec::new());
        }

        let mut remaining = if candle.is_green() { body_pct } else { -body_pct };
        let mut events = Vec::new();

        while remaining.abs() > FILL_EPSILON {
            let mut bucket = match std::mem::replace(&mut self.phase, Phase::Empty) {
                Phase::Filling(bucket) => bucket,
                Phase::Empty => OpenBucket::start(candle.open, candle.timestamp),
                Phase::Sealed { handoff_price } | Phase::Cancelled { handoff_price } => {
                    OpenBucket::start(handoff_price, candle.timestamp)
                }
            };

            let capacity_left = self.capacity - bucket.fill.abs();
            if capacity_left <= FILL_EPSILON {
                let sealed = self.seal(bucket, candle.timestamp);
                self.phase = Phase::Sealed {
                    handoff_price: sealed.close_price,
                };
                self.sealed.push(sealed.clone());
                events.push(BucketEvent::Sealed(sealed));
                continue;
            }

            // Opposing movement may carry the fill through zero; only landing on it cancels
            let delta = remaining.abs().min(capacity_left).copysign(remaining);

            bucket.fill += delta;
            remaining -= delta;
            bucket.close_price = candle.close;

            if (bucket.fill.abs() - self.capacity).abs() <= FILL_EPSILON {
                bucket.fill = self.capacity.copysign(bucket.fill);
            }

            if bucket.fill.abs() <= FILL_EPSILON {
                tracing::trace!(at = %candle.timestamp, price = candle.close, "bucket cancelled");
                self.phase = Phase::Cancelled {
                    handoff_price: candle.close,
                };
                events.push(BucketEvent::Cancelled {
                    handoff_price: candle.close,
                    at: candle.timestamp,
                });
                break;
            }

            self.phase = Phase::Filling(bucket);
        }

        Ok(events)
    }

    /// Consume the accumulator, dropping any bucket that never sealed
    pub fn finish(self) -> Vec<Bucket> {
        if let Phase::Filling(bucket) = &self.phase {
            tracing::trace!(fill = bucket.fill, "discarding unsealed bucket");
        }
        self.sealed
    }

    /// The sealing candle's timestamp becomes the bucket's end time
    fn seal(&mut self, bucket: OpenBucket, at: DateTime<Utc>) -> Bucket {
        let id = self.next_id;
        self.next_id += 1;
        Bucket {
            id,
            fill: bucket.fill,
            open_price: bucket.open_price,
            close_price: bucket.close_price,
            start_time: bucket.start_time,
            end_time: at,
        }
    }
}

/// Run a whole candle sequence through a fresh accumulator
pub fn accumulate(
    candles: &[Candle],
    capacity: BucketCapacity,
) -> Result<Vec<Bucket>, CandleError> {
    let mut accumulator = BucketAccumulator::new(capacity);
    for candle in candles {
        accumulator.push(candle)?;
    }
    Ok(accumulator.finish())
}
