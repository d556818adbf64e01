use chrono::{DateTime, Utc};

use super::{BucketCapacity, FILL_EPSILON};
use crate::error::SignalError;
use crate::models::{Bucket, BucketDirection};

/// Direction of the most recently sealed bucket
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSignal {
    pub bucket_id: u64,
    pub direction: BucketDirection,
    pub fill: f64,
    pub close_price: f64,
    pub end_time: DateTime<Utc>,
}

/// Counts over a run of sealed buckets, logged once per cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketSummary {
    pub total: usize,
    pub bullish: usize,
    pub bearish: usize,
    pub net_fill: f64,
}

impl BucketSummary {
    /// Bullish to bearish ratio, None when there are no bearish buckets
    pub fn ratio(&self) -> Option<f64> {
        if self.bearish == 0 {
            None
        } else {
            Some(self.bullish as f64 / self.bearish as f64)
        }
    }
}

/// Stateless projection from sealed buckets to a directional signal
#[derive(Debug, Clone, Copy)]
pub struct SignalClassifier {
    capacity: f64,
}

impl SignalClassifier {
    pub fn new(capacity: BucketCapacity) -> Self {
        Self {
            capacity: capacity.pct(),
        }
    }

    pub fn is_complete(&self, bucket: &Bucket) -> bool {
        bucket.fill.abs() >= self.capacity - FILL_EPSILON
    }

    /// Buckets that reached full capacity, in input order
    pub fn complete<'a>(&self, buckets: &'a [Bucket]) -> impl Iterator<Item = &'a Bucket> + 'a {
        let classifier = *self;
        buckets.iter().filter(move |b| classifier.is_complete(b))
    }

    /// Classify the latest full bucket.
    ///
    /// Returns `Ok(None)` when nothing has sealed yet. A zero-fill bucket at the
    /// tail means the accumulator broke its own invariant and is an error.
    pub fn latest(&self, buckets: &[Bucket]) -> Result<Option<BucketSignal>, SignalError> {
        let Some(bucket) = buckets
            .iter()
            .rev()
            .find(|b| self.is_complete(b) || b.fill.abs() <= FILL_EPSILON)
        else {
            return Ok(None);
        };

        let direction = BucketDirection::from_fill(bucket.fill)
            .filter(|_| bucket.fill.abs() > FILL_EPSILON)
            .ok_or(SignalError::ZeroFill {
                bucket_id: bucket.id,
            })?;

        Ok(Some(BucketSignal {
            bucket_id: bucket.id,
            direction,
            fill: bucket.fill,
            close_price: bucket.close_price,
            end_time: bucket.end_time,
        }))
    }

    pub fn summarize(&self, buckets: &[Bucket]) -> BucketSummary {
        self.complete(buckets)
            .fold(BucketSummary::default(), |mut summary, bucket| {
                summary.total += 1;
                summary.net_fill += bucket.fill;
                match bucket.direction() {
                    Some(BucketDirection::Bullish) => summary.bullish += 1,
                    Some(BucketDirection::Bearish) => summary.bearish += 1,
                    None => {}
                }
                summary
            })
    }
}
