use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CandleError;

/// OHLCV candlestick data
///
/// Only `open` and `close` feed the bucket accumulator; the rest is kept
/// because the exchange hands it to us anyway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Candle with only the fields the accumulator reads; high/low are derived
    pub fn from_body(timestamp: DateTime<Utc>, open: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 0.0,
        }
    }

    /// Reject prices the body-percentage math cannot handle
    pub fn validate(&self) -> Result<(), CandleError> {
        if !self.open.is_finite() || !self.close.is_finite() {
            return Err(CandleError::NonFinitePrice {
                timestamp: self.timestamp,
            });
        }
        if self.open <= 0.0 || self.close <= 0.0 {
            return Err(CandleError::NonPositivePrice {
                timestamp: self.timestamp,
                open: self.open,
                close: self.close,
            });
        }
        Ok(())
    }

    /// Absolute body size as a percentage of the open price
    pub fn body_pct(&self) -> f64 {
        (self.close - self.open).abs() / self.open * 100.0
    }

    pub fn is_green(&self) -> bool {
        self.close > self.open
    }
}

/// A sealed bucket ("cup"): a capacity-bounded run of signed body percentage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bucket {
    pub id: u64,
    /// Signed fill in percent; always exactly +/- capacity once sealed
    pub fill: f64,
    pub open_price: f64,
    pub close_price: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Bucket {
    pub fn direction(&self) -> Option<BucketDirection> {
        BucketDirection::from_fill(self.fill)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BucketDirection {
    Bullish,
    Bearish,
}

impl BucketDirection {
    pub fn from_fill(fill: f64) -> Option<Self> {
        if fill > 0.0 {
            Some(Self::Bullish)
        } else if fill < 0.0 {
            Some(Self::Bearish)
        } else {
            None
        }
    }

    /// Chart colour used in logs and the bucket table
    pub fn colour(&self) -> &'static str {
        match self {
            Self::Bullish => "GREEN",
            Self::Bearish => "RED",
        }
    }
}

/// Which position the bot believes is open for an asset
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PositionSide {
    #[default]
    Flat,
    Long,
    Short,
}

impl PositionSide {
    /// Side name as the position-management service spells it
    pub fn api_name(&self) -> Option<&'static str> {
        match self {
            Self::Flat => None,
            Self::Long => Some("Long"),
            Self::Short => Some("Short"),
        }
    }

    pub fn from_api_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "long" => Some(Self::Long),
            "short" => Some(Self::Short),
            _ => None,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => write!(f, "none"),
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Candle interval, spelled the way exchanges spell it ("15m", "1h", ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Minutes(u32),
    Hours(u32),
    Days(u32),
}

impl Timeframe {
    pub fn duration(&self) -> Duration {
        match *self {
            Self::Minutes(n) => Duration::minutes(n as i64),
            Self::Hours(n) => Duration::hours(n as i64),
            Self::Days(n) => Duration::days(n as i64),
        }
    }

    pub fn as_secs(&self) -> i64 {
        self.duration().num_seconds()
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unit_start = match s.char_indices().last() {
            Some((idx, _)) if idx > 0 => idx,
            _ => return Err(format!("invalid timeframe '{}'", s)),
        };
        let (count, unit) = s.split_at(unit_start);
        let count: u32 = count
            .parse()
            .map_err(|_| format!("invalid timeframe '{}'", s))?;
        if count == 0 {
            return Err(format!("timeframe '{}' must be non-zero", s));
        }
        match unit {
            "m" => Ok(Self::Minutes(count)),
            "h" => Ok(Self::Hours(count)),
            "d" => Ok(Self::Days(count)),
            _ => Err(format!("unsupported timeframe unit in '{}'", s)),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minutes(n) => write!(f, "{}m", n),
            Self::Hours(n) => write!(f, "{}h", n),
            Self::Days(n) => write!(f, "{}d", n),
        }
    }
}
