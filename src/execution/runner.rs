use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use super::reconciler::{PositionReconciler, ReconcileOutcome};
use super::schedule::{next_cycle_at, until_next_cycle};
use crate::api::{closed_candles, fetch_all_candles, market_symbol, CandleSource, PositionGateway};
use crate::buckets::{accumulate, BucketCapacity, BucketSignal, BucketSummary, SignalClassifier};
use crate::config::AppConfig;
use crate::error::{CycleError, SourceError};
use crate::models::{Bucket, Candle, Timeframe};

/// Everything a cycle needs, resolved from `AppConfig`
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub assets: Vec<String>,
    pub quote_asset: String,
    pub fallback_quotes: Vec<String>,
    pub timeframe: Timeframe,
    pub capacity: BucketCapacity,
    pub history_start: DateTime<Utc>,
    pub page_limit: usize,
    pub page_delay: Duration,
    pub asset_delay: Duration,
    pub safety_delay: chrono::Duration,
    pub position_size: f64,
}

impl RunnerSettings {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            assets: config
                .assets
                .iter()
                .map(|a| a.trim().to_uppercase())
                .filter(|a| !a.is_empty())
                .collect(),
            quote_asset: config.quote_asset.to_uppercase(),
            fallback_quotes: config
                .fallback_quotes
                .iter()
                .map(|q| q.trim().to_uppercase())
                .filter(|q| !q.is_empty())
                .collect(),
            timeframe: config.parsed_timeframe()?,
            capacity: config.capacity()?,
            history_start: config.history_start,
            page_limit: config.page_limit,
            page_delay: config.exchange.page_delay(),
            asset_delay: config.asset_delay(),
            safety_delay: config.safety_delay(),
            position_size: config.position_size,
        })
    }
}

/// What happened to one asset during a cycle
#[derive(Debug)]
pub struct AssetReport {
    pub asset: String,
    pub sealed_buckets: usize,
    pub summary: BucketSummary,
    pub signal: Option<BucketSignal>,
    pub outcome: ReconcileOutcome,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub assets: Vec<(String, Result<AssetReport, CycleError>)>,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.assets.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.assets.len() - self.succeeded()
    }

    pub fn get(&self, asset: &str) -> Option<&Result<AssetReport, CycleError>> {
        self.assets.iter().find(|(a, _)| a == asset).map(|(_, r)| r)
    }
}

/// Drives fetch -> accumulate -> classify -> reconcile for every asset,
/// strictly one asset at a time.
pub struct BotRunner<S, G> {
    source: S,
    gateway: G,
    settings: RunnerSettings,
    reconcilers: HashMap<String, PositionReconciler>,
}

impl<S: CandleSource, G: PositionGateway> BotRunner<S, G> {
    pub fn new(source: S, gateway: G, settings: RunnerSettings) -> Self {
        let reconcilers = settings
            .assets
            .iter()
            .map(|asset| {
                (
                    asset.clone(),
                    PositionReconciler::new(asset.clone(), settings.position_size),
                )
            })
            .collect();

        Self {
            source,
            gateway,
            settings,
            reconcilers,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn reconciler(&self, asset: &str) -> Option<&PositionReconciler> {
        self.reconcilers.get(asset)
    }

    /// Fetch the full closed history for `asset` and turn it into sealed buckets
    pub async fn load_buckets(&self, asset: &str, capacity: BucketCapacity) -> Result<Vec<Bucket>, CycleError> {
        let (symbol, fetched) = self.fetch_history(asset).await?;
        let fetched_count = fetched.len();
        let candles = closed_candles(fetched, self.settings.timeframe, Utc::now());

        if candles.is_empty() {
            return Err(CycleError::NoCandles { symbol });
        }

        tracing::debug!(
            asset,
            symbol = %symbol,
            candles = candles.len(),
            forming = fetched_count - candles.len(),
            "accumulating buckets"
        );
        Ok(accumulate(&candles, capacity)?)
    }

    /// Try the primary quote, then each fallback quote the exchange may list instead
    async fn fetch_history(&self, asset: &str) -> Result<(String, Vec<Candle>), SourceError> {
        let quotes: Vec<&String> = std::iter::once(&self.settings.quote_asset)
            .chain(self.settings.fallback_quotes.iter())
            .collect();

        for (i, quote) in quotes.iter().enumerate() {
            let symbol = market_symbol(asset, quote);
            let result = fetch_all_candles(
                &self.source,
                &symbol,
                self.settings.timeframe,
                self.settings.history_start,
                self.settings.page_limit,
                self.settings.page_delay,
            )
            .await;

            match result {
                Ok(candles) => return Ok((symbol, candles)),
                Err(e) if e.is_unknown_symbol() && i + 1 < quotes.len() => {
                    tracing::info!(asset, "{} not listed, trying {}{}", symbol, asset, quotes[i + 1]);
                }
                Err(e) => return Err(e),
            }
        }

        // quotes always holds the primary quote, so the loop returns
        Err(SourceError::Malformed(format!("no quote asset configured for {}", asset)))
    }

    /// One asset's cycle. Errors abandon this asset only.
    pub async fn process_asset(&mut self, asset: &str) -> Result<AssetReport, CycleError> {
        let position_size = self.settings.position_size;

        // Resync before anything else so a failed fetch still refreshes the belief
        self.reconcilers
            .entry(asset.to_string())
            .or_insert_with(|| PositionReconciler::new(asset, position_size))
            .refresh(&self.gateway)
            .await;

        let buckets = self.load_buckets(asset, self.settings.capacity).await?;

        let classifier = SignalClassifier::new(self.settings.capacity);
        let summary = classifier.summarize(&buckets);
        let signal = classifier.latest(&buckets)?;

        match &signal {
            Some(s) => tracing::info!(
                asset,
                bucket_id = s.bucket_id,
                fill = s.fill,
                total = summary.total,
                bullish = summary.bullish,
                bearish = summary.bearish,
                "📊 Latest sealed bucket is {}",
                s.direction.colour()
            ),
            None => tracing::info!(asset, "📊 No sealed bucket yet"),
        }

        let reconciler = self
            .reconcilers
            .entry(asset.to_string())
            .or_insert_with(|| PositionReconciler::new(asset, position_size));
        let outcome = reconciler.reconcile_signal(signal.as_ref(), &self.gateway).await;

        Ok(AssetReport {
            asset: asset.to_string(),
            sealed_buckets: buckets.len(),
            summary,
            signal,
            outcome,
        })
    }

    /// Process every configured asset once, isolating failures per asset
    pub async fn run_cycle(&mut self) -> CycleReport {
        let assets = self.settings.assets.clone();
        let mut report = CycleReport::default();

        for (i, asset) in assets.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.asset_delay).await;
            }

            tracing::info!("🔍 Processing {}", asset);
            let result = self.process_asset(asset).await;
            if let Err(e) = &result {
                tracing::error!(asset = %asset, "✗ Cycle abandoned: {}", e);
            }
            report.assets.push((asset.clone(), result));
        }

        report
    }

    /// Run a cycle now, then one after every timeframe boundary, forever
    pub async fn run_forever(&mut self) {
        loop {
            let report = self.run_cycle().await;

            let now = Utc::now();
            let next = next_cycle_at(now, self.settings.timeframe, self.settings.safety_delay);
            let wait = until_next_cycle(now, self.settings.timeframe, self.settings.safety_delay);
            tracing::info!(
                "✅ Cycle complete ({} ok, {} failed), sleeping {:.1}s until {}",
                report.succeeded(),
                report.failed(),
                wait.as_secs_f64(),
                next.format("%Y-%m-%d %H:%M:%S UTC")
            );

            tokio::time::sleep(wait).await;
        }
    }
}
