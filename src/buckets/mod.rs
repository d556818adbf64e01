// Bucket-fill signal generation
pub mod accumulator;
pub mod classifier;

pub use accumulator::{accumulate, AccumulatorState, BucketAccumulator, BucketEvent, FILL_EPSILON};
pub use classifier::{BucketSignal, BucketSummary, SignalClassifier};

use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPACITY_PCT: f64 = 2.0;

/// Fill magnitude (percent) a bucket must reach before it is sealed.
///
/// Always positive and finite, so the accumulator loop is guaranteed to make
/// progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct BucketCapacity(f64);

impl BucketCapacity {
    pub fn new(pct: f64) -> Option<Self> {
        if pct.is_finite() && pct > FILL_EPSILON {
            Some(Self(pct))
        } else {
            None
        }
    }

    pub fn pct(&self) -> f64 {
        self.0
    }
}

impl Default for BucketCapacity {
    fn default() -> Self {
        Self(DEFAULT_CAPACITY_PCT)
    }
}

impl TryFrom<f64> for BucketCapacity {
    type Error = String;

    fn try_from(pct: f64) -> Result<Self, Self::Error> {
        Self::new(pct).ok_or_else(|| format!("bucket capacity must be a positive percentage, got {}", pct))
    }
}

impl From<BucketCapacity> for f64 {
    fn from(capacity: BucketCapacity) -> Self {
        capacity.0
    }
}
