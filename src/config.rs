use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub failures: FailuresConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Stage sub-budgets in milliseconds. See `budget.rs` for semantics.
#[derive(Debug, Deserialize, Clone)]
pub struct BudgetSection {
    #[serde(default = "default_total_ms")]
    pub total_ms: u64,
    #[serde(default = "default_cache_ms")]
    pub cache_ms: u64,
    #[serde(default = "default_fastpath_ms")]
    pub fastpath_ms: u64,
    #[serde(default = "default_slowpath_ms")]
    pub slowpath_ms: u64,
    #[serde(default = "default_min_remaining_ms")]
    pub min_remaining_ms: u64,
    /// FastPath sub-budget when the broad-query rule fires (SlowPath is
    /// disabled for those requests).
    #[serde(default = "default_broad_fastpath_ms")]
    pub broad_fastpath_ms: u64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            total_ms: default_total_ms(),
            cache_ms: default_cache_ms(),
            fastpath_ms: default_fastpath_ms(),
            slowpath_ms: default_slowpath_ms(),
            min_remaining_ms: default_min_remaining_ms(),
            broad_fastpath_ms: default_broad_fastpath_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregatorConfig {
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_product_url")]
    pub product_url: String,
    /// Origin label used for circuit-breaker keys.
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Custom User-Agent; a rotating browser UA is used when unset.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Bodies shorter than this are treated as blocked/empty pages.
    #[serde(default = "default_min_html_length")]
    pub min_html_length: usize,
    /// Offers below this price are dropped as accessory noise. 0 disables.
    #[serde(default)]
    pub min_price_threshold: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            product_url: default_product_url(),
            origin: default_origin(),
            user_agent: None,
            min_html_length: default_min_html_length(),
            min_price_threshold: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_positive_ttl_secs")]
    pub positive_ttl_secs: u64,
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,
    /// Per-operation deadline; the cache never blocks the pipeline longer.
    #[serde(default = "default_cache_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            positive_ttl_secs: default_positive_ttl_secs(),
            negative_ttl_secs: default_negative_ttl_secs(),
            op_timeout_ms: default_cache_op_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BreakerConfig {
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,
    #[serde(default = "default_open_secs")]
    pub open_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            fail_threshold: default_fail_threshold(),
            open_secs: default_open_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    /// Cap on concurrently leased pages across all requests.
    #[serde(default = "default_browser_concurrency")]
    pub concurrency: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            concurrency: default_browser_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FailuresConfig {
    /// Bounded queue between the request path and the durable writer.
    #[serde(default = "default_failure_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for FailuresConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_failure_queue_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ResourcesConfig {
    /// Optional TOML rules file; builtin tables are used when unset.
    pub rules_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeaturesConfig {
    #[serde(default = "default_true")]
    pub slowpath_enabled: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            slowpath_enabled: true,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/pscout.db")
}
fn default_total_ms() -> u64 {
    12_000
}
fn default_cache_ms() -> u64 {
    500
}
fn default_fastpath_ms() -> u64 {
    4_000
}
fn default_slowpath_ms() -> u64 {
    6_500
}
fn default_min_remaining_ms() -> u64 {
    1_000
}
fn default_broad_fastpath_ms() -> u64 {
    10_000
}
fn default_search_url() -> String {
    "https://search.danawa.com/dsearch.php".to_string()
}
fn default_product_url() -> String {
    "https://prod.danawa.com/info/".to_string()
}
fn default_origin() -> String {
    "danawa".to_string()
}
fn default_min_html_length() -> usize {
    5_000
}
fn default_positive_ttl_secs() -> u64 {
    21_600
}
fn default_negative_ttl_secs() -> u64 {
    60
}
fn default_cache_op_timeout_ms() -> u64 {
    250
}
fn default_fail_threshold() -> u32 {
    3
}
fn default_open_secs() -> u64 {
    60
}
fn default_browser_concurrency() -> usize {
    2
}
fn default_failure_queue_capacity() -> usize {
    256
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

/// Environment overrides applied after the file is parsed, so deployment
/// secrets and per-stage timeouts never need to live in the TOML.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("PSCOUT_DATABASE_PATH") {
        config.database.path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("PSCOUT_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Ok(v) = std::env::var("PSCOUT_USER_AGENT") {
        config.aggregator.user_agent = Some(v);
    }
    if let Ok(v) = std::env::var("PSCOUT_SLOWPATH_ENABLED") {
        config.features.slowpath_enabled = matches!(v.as_str(), "1" | "true" | "yes");
    }
    for (var, slot) in [
        ("PSCOUT_TIMEOUT_TOTAL_MS", &mut config.budget.total_ms),
        ("PSCOUT_TIMEOUT_CACHE_MS", &mut config.budget.cache_ms),
        ("PSCOUT_TIMEOUT_FASTPATH_MS", &mut config.budget.fastpath_ms),
        ("PSCOUT_TIMEOUT_SLOWPATH_MS", &mut config.budget.slowpath_ms),
    ] {
        if let Ok(v) = std::env::var(var) {
            if let Ok(ms) = v.parse::<u64>() {
                *slot = ms;
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

/// Defaults plus environment overrides, for when no config file exists.
pub fn default_config() -> Result<Config> {
    let mut config: Config = toml::from_str("").expect("empty config parses to defaults");
    apply_env_overrides(&mut config);
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let b = &config.budget;
    if b.total_ms == 0 {
        anyhow::bail!("budget.total_ms must be > 0");
    }
    if b.cache_ms + b.fastpath_ms + b.slowpath_ms > b.total_ms {
        anyhow::bail!(
            "budget stages exceed total: {} + {} + {} > {} ms",
            b.cache_ms,
            b.fastpath_ms,
            b.slowpath_ms,
            b.total_ms
        );
    }
    if config.browser.concurrency == 0 {
        anyhow::bail!("browser.concurrency must be >= 1");
    }
    if config.failures.queue_capacity == 0 {
        anyhow::bail!("failures.queue_capacity must be >= 1");
    }
    if !(config.aggregator.search_url.starts_with("http://")
        || config.aggregator.search_url.starts_with("https://"))
    {
        anyhow::bail!("aggregator.search_url must be an http(s) URL");
    }
    if config.aggregator.min_price_threshold < 0 {
        anyhow::bail!("aggregator.min_price_threshold must be >= 0");
    }
    Ok(())
}

impl Config {
    pub fn budget_config(&self) -> crate::budget::BudgetConfig {
        use std::time::Duration;
        crate::budget::BudgetConfig {
            total: Duration::from_millis(self.budget.total_ms),
            cache: Duration::from_millis(self.budget.cache_ms),
            fastpath: Duration::from_millis(self.budget.fastpath_ms),
            slowpath: Duration::from_millis(self.budget.slowpath_ms),
            min_remaining: Duration::from_millis(self.budget.min_remaining_ms),
        }
    }
}
