//! Layered configuration loading.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use ::config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::buckets::{BucketCapacity, DEFAULT_CAPACITY_PCT};
use crate::models::Timeframe;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_capacity_pct")]
    pub capacity_pct: f64,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Quotes tried in order when the exchange does not list `<asset><quote_asset>`
    #[serde(default = "default_fallback_quotes")]
    pub fallback_quotes: Vec<String>,
    /// Fixed anchor for the candle history; bucket ids are only stable while it stays put
    #[serde(default = "default_history_start")]
    pub history_start: DateTime<Utc>,
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default = "default_safety_delay_secs")]
    pub safety_delay_secs: u64,
    #[serde(default = "default_asset_delay_ms")]
    pub asset_delay_ms: u64,
    #[serde(default = "default_position_size")]
    pub position_size: f64,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_exchange_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
}

impl ExchangeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            timeout_secs: default_exchange_timeout_secs(),
            requests_per_minute: default_requests_per_minute(),
            page_delay_ms: default_page_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            table_name: default_table_name(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            capacity_pct: default_capacity_pct(),
            timeframe: default_timeframe(),
            assets: default_assets(),
            quote_asset: default_quote_asset(),
            fallback_quotes: default_fallback_quotes(),
            history_start: default_history_start(),
            page_limit: default_page_limit(),
            safety_delay_secs: default_safety_delay_secs(),
            asset_delay_ms: default_asset_delay_ms(),
            position_size: default_position_size(),
            log_filter: default_log_filter(),
            exchange: ExchangeConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn capacity(&self) -> Result<BucketCapacity> {
        BucketCapacity::new(self.capacity_pct)
            .with_context(|| format!("capacity_pct must be positive, got {}", self.capacity_pct))
    }

    pub fn parsed_timeframe(&self) -> Result<Timeframe> {
        self.timeframe.parse::<Timeframe>().map_err(anyhow::Error::msg)
    }

    pub fn safety_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.safety_delay_secs as i64)
    }

    pub fn asset_delay(&self) -> Duration {
        Duration::from_millis(self.asset_delay_ms)
    }

    /// Reject settings the bot cannot run with
    pub fn validate(&self) -> Result<()> {
        self.capacity()?;
        self.parsed_timeframe()?;

        if self.assets.iter().all(|a| a.trim().is_empty()) {
            bail!("at least one asset must be configured");
        }
        if !(self.position_size.is_finite() && self.position_size > 0.0) {
            bail!("position_size must be positive, got {}", self.position_size);
        }
        if self.page_limit == 0 {
            bail!("page_limit must be at least 1");
        }
        if self.exchange.timeout_secs == 0 {
            bail!("exchange.timeout_secs must be at least 1");
        }
        if self.gateway.timeout_secs == 0 {
            bail!("gateway.timeout_secs must be at least 1");
        }
        Ok(())
    }
}

/// Load the application configuration from `config_dir`, optional environment overlays, and env vars.
///
/// Sources (lowest to highest precedence):
/// 1. Built-in defaults
/// 2. `{config_dir}/default.toml` (optional)
/// 3. `{config_dir}/{environment}.toml` (if `environment` is Some)
/// 4. `{config_dir}/local.toml` (optional, ignored in git)
/// 5. Environment variables prefixed with `BUCKETBOT__`
pub fn load_config(config_dir: impl AsRef<Path>, env: Option<&str>) -> Result<AppConfig> {
    let base_path = config_dir.as_ref();

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(false));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("BUCKETBOT")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("assets")
            .with_list_parse_key("fallback_quotes")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    let app: AppConfig = config
        .try_deserialize()
        .map_err(|err: ConfigError| anyhow::Error::from(err))?;
    app.validate()?;
    Ok(app)
}

fn default_capacity_pct() -> f64 {
    DEFAULT_CAPACITY_PCT
}

fn default_timeframe() -> String {
    "15m".to_string()
}

fn default_assets() -> Vec<String> {
    ["ZEC", "ICP", "ENA", "BAT", "VET", "HOOK"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_fallback_quotes() -> Vec<String> {
    vec!["BUSD".to_string()]
}

fn default_history_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 9, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn default_page_limit() -> usize {
    300
}

fn default_safety_delay_secs() -> u64 {
    20
}

fn default_asset_delay_ms() -> u64 {
    500
}

fn default_position_size() -> f64 {
    100.0
}

fn default_log_filter() -> String {
    "bucketbot=info".to_string()
}

fn default_rest_url() -> String {
    crate::api::binance::BINANCE_API_BASE.to_string()
}

fn default_exchange_timeout_secs() -> u64 {
    10
}

fn default_requests_per_minute() -> u32 {
    1200
}

fn default_page_delay_ms() -> u64 {
    100
}

fn default_gateway_url() -> String {
    "http://localhost:5007".to_string()
}

fn default_table_name() -> String {
    "MAZE".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    /// Scratch directory under the system temp dir, removed on drop
    struct ConfigDir(PathBuf);

    impl ConfigDir {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!("bucketbot-config-{}-{}", name, std::process::id()));
            let _ = fs::remove_dir_all(&path);
            fs::create_dir_all(&path).unwrap();
            Self(path)
        }

        fn write(&self, file: &str, contents: &str) {
            fs::write(self.0.join(file), contents).unwrap();
        }
    }

    impl Drop for ConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = ConfigDir::new("empty");
        let config = load_config(&dir.0, None).unwrap();

        assert_eq!(config.capacity_pct, 2.0);
        assert_eq!(config.parsed_timeframe().unwrap(), Timeframe::Minutes(15));
        assert_eq!(config.assets.len(), 6);
        assert_eq!(config.fallback_quotes, vec!["BUSD".to_string()]);
        assert_eq!(config.history_start, default_history_start());
        assert_eq!(config.gateway.table_name, "MAZE");
        assert_eq!(config.exchange.page_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_environment_file_overrides_default() {
        let dir = ConfigDir::new("layers");
        dir.write(
            "default.toml",
            r#"
capacity_pct = 1.5
assets = ["ZEC"]
fallback_quotes = []

[gateway]
table_name = "PAPER"
"#,
        );
        dir.write("live.toml", "capacity_pct = 3.0\n");

        let config = load_config(&dir.0, Some("live")).unwrap();
        assert_eq!(config.capacity_pct, 3.0);
        assert_eq!(config.assets, vec!["ZEC".to_string()]);
        assert!(config.fallback_quotes.is_empty());
        assert_eq!(config.gateway.table_name, "PAPER");
        assert_eq!(config.gateway.base_url, "http://localhost:5007");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = ConfigDir::new("invalid");
        dir.write("default.toml", "capacity_pct = 0.0\n");
        assert!(load_config(&dir.0, None).is_err());

        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.timeframe = "15x".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.assets.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.position_size = -1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.page_limit = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.gateway.timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
