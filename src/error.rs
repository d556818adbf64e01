use chrono::{DateTime, Utc};
use thiserror::Error;

/// Malformed candle input. Fatal for the asset's cycle, never for the process.
#[derive(Debug, Error, PartialEq)]
pub enum CandleError {
    #[error("candle at {timestamp} has non-positive price (open {open}, close {close})")]
    NonPositivePrice {
        timestamp: DateTime<Utc>,
        open: f64,
        close: f64,
    },
    #[error("candle at {timestamp} has a non-finite price")]
    NonFinitePrice { timestamp: DateTime<Utc> },
    #[error("candle at {current} is not after the previous candle at {previous}")]
    OutOfOrder {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
}

/// Failure while fetching candles from the exchange
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("exchange request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("exchange returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed exchange payload: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Exchange rejected the pair as not listed (Binance code -1121)
    pub fn is_unknown_symbol(&self) -> bool {
        matches!(
            self,
            Self::Status { status: 400, body } if body.contains("-1121") || body.contains("Invalid symbol")
        )
    }
}

/// Failure while talking to the position-management service
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("position service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("position service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed position service payload: {0}")]
    Malformed(String),
    #[error("invalid position request: {0}")]
    InvalidRequest(String),
}

/// A sealed bucket broke an invariant of the accumulator
#[derive(Debug, Error, PartialEq)]
pub enum SignalError {
    #[error("sealed bucket {bucket_id} has zero fill")]
    ZeroFill { bucket_id: u64 },
}

/// Why one asset's cycle was abandoned
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Candle(#[from] CandleError),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error("no candles returned for {symbol}")]
    NoCandles { symbol: String },
}
