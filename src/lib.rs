// Core modules
pub mod api;
pub mod buckets;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;

// Re-export commonly used types
pub use api::*;
pub use buckets::{BucketCapacity, BucketSignal, SignalClassifier};
pub use error::{CandleError, CycleError, GatewayError, SignalError, SourceError};
pub use models::*;
