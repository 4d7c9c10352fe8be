//! Crawler configuration
//!
//! Layered settings: compiled defaults, then an optional TOML file, then
//! `CRAWLER_*` environment variables, then CLI flags applied by the binary.
//! CSS selectors live in a separate selector document so the engine hardcodes
//! none.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::CrawlerError;

/// Compiled default values.
pub mod defaults {
    pub const BASE_URL: &str = "https://www.g2b.go.kr";
    pub const BID_LIST_URL: &str =
        "https://www.g2b.go.kr/pt/menu/selectSubFrame.do?framesrc=/pt/menu/frameTgong.do";
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
    pub const PAGE_DELAY_MS: u64 = 1_000;
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_DELAY_MS: u64 = 2_000;
    pub const RETRY_MAX_DELAY_MS: u64 = 60_000;
    pub const MAX_WORKERS: u32 = 3;
    pub const QUEUE_SIZE: usize = 50;
    pub const BATCH_DELAY_MS: u64 = 500;
    pub const SAVE_INTERVAL: u32 = 10;
    pub const SCHEDULER_INTERVAL_MINUTES: u64 = 60;
    pub const SCHEDULER_CRON: &str = "0 */6 * * *";
    pub const LOG_LEVEL: &str = "info";
    pub const METRICS_NAMESPACE: &str = "bid_crawler";
    pub const METRICS_PORT: u16 = 8000;
    pub const USER_AGENT: &str = "BidCrawler/1.0 (+https://github.com/Chanseok/bid-crawler)";
}

/// Browser/fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run without a visible window. The static-fetch session ignores this
    /// but the flag is part of the CLI surface.
    pub headless: bool,
    /// Per-navigation timeout in milliseconds.
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_backoff: bool,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            retry_delay_ms: defaults::RETRY_DELAY_MS,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            exponential_backoff: true,
            jitter: true,
        }
    }
}

/// Output format for collected notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Both,
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub state_file: PathBuf,
    pub output_format: OutputFormat,
    /// Flush/checkpoint cadence in collected items.
    pub save_interval: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            state_file: PathBuf::from("data/crawl_state.json"),
            output_format: OutputFormat::Json,
            save_interval: defaults::SAVE_INTERVAL,
        }
    }
}

/// Scheduler mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    #[default]
    Interval,
    Cron,
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub mode: SchedulerMode,
    pub interval_minutes: u64,
    /// Five-field cron expression: minute hour day month weekday.
    pub cron_expression: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: SchedulerMode::Interval,
            interval_minutes: defaults::SCHEDULER_INTERVAL_MINUTES,
            cron_expression: defaults::SCHEDULER_CRON.to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Rejects malformed cron expressions up front so a bad schedule fails at
    /// startup rather than at the first tick.
    pub fn validate(&self) -> Result<(), CrawlerError> {
        if self.mode == SchedulerMode::Cron && self.cron_expression.split_whitespace().count() != 5 {
            return Err(CrawlerError::Configuration(format!(
                "invalid cron expression '{}': expected 'minute hour day month weekday'",
                self.cron_expression
            )));
        }
        if self.mode == SchedulerMode::Interval && self.interval_minutes == 0 {
            return Err(CrawlerError::Configuration(
                "interval_minutes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "error" | "warn" | "info" | "debug" | "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    pub log_dir: PathBuf,
    /// Per-module level overrides, e.g. "reqwest" -> "warn".
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_filters = HashMap::new();
        module_filters.insert("reqwest".to_string(), "warn".to_string());
        module_filters.insert("hyper".to_string(), "warn".to_string());
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: PathBuf::from("logs"),
            module_filters,
        }
    }
}

/// robots.txt settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotsConfig {
    pub enabled: bool,
    pub respect_crawl_delay: bool,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            respect_crawl_delay: true,
        }
    }
}

/// Worker-pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Number of consumer workers, 1..=10.
    pub max_workers: u32,
    /// Bounded task-queue capacity.
    pub queue_size: usize,
    /// Delay between list pages in milliseconds.
    pub page_delay_ms: u64,
    /// Delay between item batches in milliseconds.
    pub batch_delay_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: defaults::MAX_WORKERS,
            queue_size: defaults::QUEUE_SIZE,
            page_delay_ms: defaults::PAGE_DELAY_MS,
            batch_delay_ms: defaults::BATCH_DELAY_MS,
        }
    }
}

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub prometheus_enabled: bool,
    pub prometheus_port: u16,
    pub metrics_namespace: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: false,
            prometheus_port: defaults::METRICS_PORT,
            metrics_namespace: defaults::METRICS_NAMESPACE.to_string(),
        }
    }
}

/// Complete crawler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CrawlerConfig {
    pub base_url: Option<String>,
    pub bid_list_url: Option<String>,

    /// Page/item caps; `None` means unlimited.
    pub max_pages: Option<u32>,
    pub max_items: Option<u64>,

    pub keyword: Option<String>,
    pub bid_type: Option<String>,

    pub browser: BrowserConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
    pub robots: RobotsConfig,
    pub concurrency: ConcurrencyConfig,
    pub monitoring: MonitoringConfig,

    /// Selector document path; `None` falls back to built-in selectors.
    pub selectors_file: Option<PathBuf>,
}

impl CrawlerConfig {
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(defaults::BASE_URL)
    }

    #[must_use]
    pub fn bid_list_url(&self) -> &str {
        self.bid_list_url.as_deref().unwrap_or(defaults::BID_LIST_URL)
    }

    /// Loads configuration from an optional TOML file, then applies
    /// `CRAWLER_*` environment variables on top.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(config::File::from(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("config/crawler").required(false));
        }
        let mut loaded: Self = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        loaded.apply_env();
        Ok(loaded)
    }

    /// Applies `CRAWLER_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    fn apply_env_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
            var(name).and_then(|v| v.parse().ok())
        }

        if let Some(v) = var("CRAWLER_BASE_URL") {
            self.base_url = Some(v);
        }
        if let Some(v) = parse(&var, "CRAWLER_MAX_PAGES") {
            self.max_pages = Some(v);
        }
        if let Some(v) = parse(&var, "CRAWLER_MAX_ITEMS") {
            self.max_items = Some(v);
        }
        if let Some(v) = var("CRAWLER_KEYWORD") {
            self.keyword = Some(v);
        }
        if let Some(v) = parse(&var, "CRAWLER_HEADLESS") {
            self.browser.headless = v;
        }
        if let Some(v) = var("CRAWLER_LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
        if let Some(v) = parse(&var, "CRAWLER_SCHEDULER_ENABLED") {
            self.scheduler.enabled = v;
        }
        if let Some(v) = var("CRAWLER_SCHEDULER_MODE") {
            match v.to_lowercase().as_str() {
                "cron" => self.scheduler.mode = SchedulerMode::Cron,
                "interval" => self.scheduler.mode = SchedulerMode::Interval,
                other => tracing::warn!(mode = other, "unknown scheduler mode, keeping configured value"),
            }
        }
        if let Some(v) = parse(&var, "CRAWLER_SCHEDULER_INTERVAL") {
            self.scheduler.interval_minutes = v;
        }
        if let Some(v) = var("CRAWLER_SCHEDULER_CRON") {
            self.scheduler.cron_expression = v;
        }
        if let Some(v) = parse(&var, "CRAWLER_ROBOTS_ENABLED") {
            self.robots.enabled = v;
        }
    }

    /// Startup validation; configuration errors are fatal.
    pub fn validate(&self) -> Result<(), CrawlerError> {
        if !(1..=10).contains(&self.concurrency.max_workers) {
            return Err(CrawlerError::Configuration(format!(
                "max_workers must be within 1..=10, got {}",
                self.concurrency.max_workers
            )));
        }
        if self.concurrency.queue_size == 0 {
            return Err(CrawlerError::Configuration("queue_size must be at least 1".into()));
        }
        if self.storage.save_interval == 0 {
            return Err(CrawlerError::Configuration("save_interval must be at least 1".into()));
        }
        url::Url::parse(self.base_url())
            .map_err(|e| CrawlerError::Configuration(format!("invalid base_url: {e}")))?;
        self.scheduler.validate()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.storage.data_dir)
            .with_context(|| format!("failed to create data dir {:?}", self.storage.data_dir))?;
        if let Some(parent) = self.storage.state_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state dir {parent:?}"))?;
        }
        Ok(())
    }

    /// One-line summary for startup logs.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("url={}", self.base_url()),
            format!(
                "max_pages={}",
                self.max_pages.map_or_else(|| "unlimited".into(), |v| v.to_string())
            ),
            format!(
                "max_items={}",
                self.max_items.map_or_else(|| "unlimited".into(), |v| v.to_string())
            ),
            format!("workers={}", self.concurrency.max_workers),
        ];
        if let Some(keyword) = &self.keyword {
            parts.push(format!("keyword={keyword}"));
        }
        parts.join(", ")
    }
}

/// CSS selectors for one scraped page kind. Values are comma-separated
/// alternative selectors tried in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSet {
    pub selectors: HashMap<String, String>,
}

impl SelectorSet {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.selectors.get(key).map(String::as_str)
    }
}

/// Selector document: list-page and detail-page selector sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub list: SelectorSet,
    pub detail: SelectorSet,
}

impl SelectorConfig {
    /// Loads selectors from a TOML document.
    pub fn load(path: &Path) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .with_context(|| format!("failed to read selector file {path:?}"))?
            .try_deserialize()
            .context("failed to deserialize selector file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CrawlerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.base_url(), defaults::BASE_URL);
        assert_eq!(config.concurrency.queue_size, 50);
    }

    #[test]
    fn rejects_out_of_range_workers() {
        let mut config = CrawlerConfig::default();
        config.concurrency.max_workers = 0;
        assert!(config.validate().is_err());
        config.concurrency.max_workers = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_short_cron() {
        let mut config = CrawlerConfig::default();
        config.scheduler.mode = SchedulerMode::Cron;
        config.scheduler.cron_expression = "0 */6 *".into();
        assert!(matches!(
            config.validate(),
            Err(CrawlerError::Configuration(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("CRAWLER_MAX_PAGES", "7"),
            ("CRAWLER_HEADLESS", "false"),
            ("CRAWLER_SCHEDULER_MODE", "cron"),
            ("CRAWLER_SCHEDULER_INTERVAL", "30"),
            ("CRAWLER_KEYWORD", "도로"),
            ("CRAWLER_ROBOTS_ENABLED", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = CrawlerConfig::default();
        config.apply_env_from(|name| vars.get(name).map(ToString::to_string));

        assert_eq!(config.max_pages, Some(7));
        assert!(!config.browser.headless);
        assert_eq!(config.scheduler.mode, SchedulerMode::Cron);
        assert_eq!(config.scheduler.interval_minutes, 30);
        assert_eq!(config.keyword.as_deref(), Some("도로"));
        assert!(!config.robots.enabled);
    }

    #[test]
    fn malformed_env_values_are_ignored() {
        let mut config = CrawlerConfig::default();
        config.apply_env_from(|name| (name == "CRAWLER_MAX_PAGES").then(|| "not-a-number".to_string()));
        assert_eq!(config.max_pages, None);
    }

    #[test]
    fn selector_set_lookup() {
        let mut selectors = HashMap::new();
        selectors.insert("rows".to_string(), "table tbody tr".to_string());
        let set = SelectorSet { selectors };
        assert_eq!(set.get("rows"), Some("table tbody tr"));
        assert_eq!(set.get("missing"), None);
    }
}
