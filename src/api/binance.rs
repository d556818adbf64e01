use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SourceError;
use crate::models::{Candle, Timeframe};

pub const BINANCE_API_BASE: &str = "https://api.binance.com";
const KLINES_PATH: &str = "/api/v3/klines";

// Type alias for the rate limiter to simplify signatures
type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Anything that can hand back an ordered page of candles
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Fetch up to `limit` candles opening at or after `since`, oldest first
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, SourceError>;
}

/// Exchange pair for an asset, e.g. ("zec", "USDT") -> "ZECUSDT"
pub fn market_symbol(asset: &str, quote: &str) -> String {
    format!("{}{}", asset.to_uppercase(), quote.to_uppercase())
}

/// Fetch every candle from `since` until the exchange runs out.
///
/// Pages are requested with `since = last timestamp + 1ms` until a page comes
/// back empty or shorter than `limit`, sleeping `page_delay` between pages.
pub async fn fetch_all_candles<S: CandleSource + ?Sized>(
    source: &S,
    symbol: &str,
    timeframe: Timeframe,
    since: DateTime<Utc>,
    limit: usize,
    page_delay: Duration,
) -> Result<Vec<Candle>, SourceError> {
    let limit = limit.max(1);
    let mut since = since;
    let mut candles = Vec::new();

    loop {
        let page = source.fetch(symbol, timeframe, since, limit).await?;
        let Some(last) = page.last() else {
            break;
        };
        since = last.timestamp + chrono::Duration::milliseconds(1);
        let short_page = page.len() < limit;
        candles.extend(page);

        if short_page {
            break;
        }
        tokio::time::sleep(page_delay).await;
    }

    tracing::debug!(symbol, count = candles.len(), "fetched candle history");
    Ok(candles)
}

/// Keep only candles whose interval has ended by `now`.
///
/// The last kline the exchange returns is usually the one still forming; its
/// body keeps moving until it closes, so it must not seal buckets.
pub fn closed_candles(mut candles: Vec<Candle>, timeframe: Timeframe, now: DateTime<Utc>) -> Vec<Candle> {
    candles.retain(|c| c.timestamp + timeframe.duration() <= now);
    candles
}

/// Client for Binance spot klines
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<BinanceRateLimiter>,
}

impl BinanceClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        requests_per_minute: u32,
    ) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;
        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, SourceError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, KLINES_PATH);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", timeframe.to_string()),
                ("startTime", since.timestamp_millis().to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let rows: Vec<Vec<Value>> = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("klines body: {}", e)))?;

        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

/// Kline rows are `[open_time_ms, "open", "high", "low", "close", "volume", ...]`
fn parse_kline(row: &[Value]) -> Result<Candle, SourceError> {
    if row.len() < 6 {
        return Err(SourceError::Malformed(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| SourceError::Malformed(format!("bad kline open time: {}", row[0])))?;
    let timestamp = DateTime::from_timestamp_millis(open_time)
        .ok_or_else(|| SourceError::Malformed(format!("kline open time out of range: {}", open_time)))?;

    Ok(Candle {
        timestamp,
        open: parse_number(&row[1])?,
        high: parse_number(&row[2])?,
        low: parse_number(&row[3])?,
        close: parse_number(&row[4])?,
        volume: parse_number(&row[5])?,
    })
}

fn parse_number(value: &Value) -> Result<f64, SourceError> {
    let parsed = match value {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| SourceError::Malformed(format!("bad kline number: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;
    use std::sync::Mutex;

    fn since() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 9, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_market_symbol() {
        assert_eq!(market_symbol("zec", "usdt"), "ZECUSDT");
        assert_eq!(market_symbol("HOOK", "USDT"), "HOOKUSDT");
    }

    #[test]
    fn test_parse_kline_rejects_short_rows() {
        let row: Vec<Value> = serde_json::from_str(r#"[1767916800000, "1.0"]"#).unwrap();
        assert!(matches!(parse_kline(&row), Err(SourceError::Malformed(_))));

        let row: Vec<Value> =
            serde_json::from_str(r#"[1767916800000, "abc", "1", "1", "1", "1"]"#).unwrap();
        assert!(matches!(parse_kline(&row), Err(SourceError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_fetch_parses_klines() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "ZECUSDT".into()),
                Matcher::UrlEncoded("interval".into(), "15m".into()),
                Matcher::UrlEncoded("startTime".into(), "1767916800000".into()),
                Matcher::UrlEncoded("limit".into(), "300".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    [1767916800000,"100.0","102.5","99.5","101.0","12.5",1767917699999,"0",1,"0","0","0"],
                    [1767917700000,"101.0","101.0","98.0","99.0","3.0",1767918599999,"0",1,"0","0","0"]
                ]"#,
            )
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), Duration::from_secs(5), 1200).unwrap();
        let candles = client
            .fetch("ZECUSDT", Timeframe::Minutes(15), since(), 300)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, since());
        assert_eq!(candles[0].open, 100.0);
        assert_eq!(candles[0].high, 102.5);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[0].volume, 12.5);
        assert_eq!(candles[1].close, 99.0);
    }

    #[tokio::test]
    async fn test_fetch_reports_http_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/klines")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-1121,"msg":"Invalid symbol."}"#)
            .create_async()
            .await;

        let client = BinanceClient::new(server.url(), Duration::from_secs(5), 1200).unwrap();
        let result = client
            .fetch("NOPEUSDT", Timeframe::Minutes(15), since(), 300)
            .await;

        match result {
            Err(SourceError::Status { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("Invalid symbol"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[test]
    fn test_closed_candles_drops_forming_kline() {
        let candles: Vec<Candle> = (0..3)
            .map(|i| Candle::from_body(since() + chrono::Duration::minutes(15 * i), 1.0, 1.01))
            .collect();

        // 20s after the 00:30 close: the 00:30 candle is still open
        let now = since() + chrono::Duration::minutes(30) + chrono::Duration::seconds(20);
        let closed = closed_candles(candles.clone(), Timeframe::Minutes(15), now);
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[1].timestamp, since() + chrono::Duration::minutes(15));

        // Exactly at the close time the candle counts as closed
        let closed = closed_candles(candles, Timeframe::Minutes(15), since() + chrono::Duration::minutes(45));
        assert_eq!(closed.len(), 3);
    }

    #[test]
    fn test_unknown_symbol_detection() {
        let unknown = SourceError::Status {
            status: 400,
            body: r#"{"code":-1121,"msg":"Invalid symbol."}"#.to_string(),
        };
        assert!(unknown.is_unknown_symbol());

        let throttled = SourceError::Status {
            status: 429,
            body: "Too many requests".to_string(),
        };
        assert!(!throttled.is_unknown_symbol());
        assert!(!SourceError::Malformed("x".to_string()).is_unknown_symbol());
    }

    /// Serves candles from memory and records every request
    struct PagedSource {
        candles: Vec<Candle>,
        requests: Mutex<Vec<(DateTime<Utc>, usize)>>,
    }

    #[async_trait]
    impl CandleSource for PagedSource {
        async fn fetch(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            since: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Candle>, SourceError> {
            self.requests.lock().unwrap().push((since, limit));
            Ok(self
                .candles
                .iter()
                .filter(|c| c.timestamp >= since)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    fn paged_source(count: i64) -> PagedSource {
        PagedSource {
            candles: (0..count)
                .map(|i| Candle::from_body(since() + chrono::Duration::minutes(15 * i), 1.0, 1.01))
                .collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_fetch_all_stops_on_short_page() {
        let source = paged_source(7);
        let candles = fetch_all_candles(
            &source,
            "ZECUSDT",
            Timeframe::Minutes(15),
            since(),
            3,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(candles.len(), 7);
        let requests = source.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].0, since());
        assert_eq!(
            requests[1].0,
            since() + chrono::Duration::minutes(30) + chrono::Duration::milliseconds(1)
        );
    }

    #[tokio::test]
    async fn test_fetch_all_stops_on_empty_page() {
        let source = paged_source(6);
        let candles = fetch_all_candles(
            &source,
            "ZECUSDT",
            Timeframe::Minutes(15),
            since(),
            3,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(candles.len(), 6);
        assert_eq!(source.requests.lock().unwrap().len(), 3);
        assert!(candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
