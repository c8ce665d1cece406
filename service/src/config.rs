//! Service configuration.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use ratesync_common::{Currency, NewSeries};
use ratesync_fx::{DenseRangeCacheConfig, EventWorkerConfig, RateEngineConfig};
use ratesync_store::DatabaseConfig;

/// A series to register at startup if it does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSpec {
    pub currency: String,
    pub provider_series_id: String,
}

impl SeriesSpec {
    /// Parse `EUR:DEXUSEU,JPY:DEXJPUS`. Malformed entries are kept as-is and
    /// rejected by [`ServiceConfig::validate`].
    pub fn parse_list(raw: &str) -> Vec<SeriesSpec> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((currency, id)) => SeriesSpec {
                    currency: currency.trim().to_string(),
                    provider_series_id: id.trim().to_string(),
                },
                None => SeriesSpec {
                    currency: entry.to_string(),
                    provider_series_id: String::new(),
                },
            })
            .collect()
    }

    pub fn to_new_series(&self) -> Result<NewSeries, String> {
        let currency = Currency::parse(&self.currency).map_err(|e| e.to_string())?;
        if self.provider_series_id.is_empty() {
            return Err(format!("Series for {} has no provider series id", currency));
        }
        Ok(NewSeries::new(currency, self.provider_series_id.clone()))
    }
}

/// Import configuration.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Base currency every series is quoted against.
    pub base_currency: String,
    /// Interval between scheduled imports of all enabled series.
    pub interval: Duration,
    /// Run one import as soon as the service starts.
    pub import_on_start: bool,
    /// Directory holding `<provider_series_id>.json` observation files.
    pub provider_dir: PathBuf,
    /// Provider name used in logs and errors.
    pub provider_name: String,
    /// Series registered at startup.
    pub series: Vec<SeriesSpec>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            base_currency: "USD".to_string(),
            interval: Duration::from_secs(6 * 60 * 60),
            import_on_start: true,
            provider_dir: PathBuf::from("data/observations"),
            provider_name: "json-file".to_string(),
            series: Vec::new(),
        }
    }
}

/// Event worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Fallback polling interval for pending series events.
    pub poll_interval: Duration,
    /// Events handled per pass.
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 50,
        }
    }
}

/// Dense range cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Optional expiry on top of import invalidation.
    pub ttl: Option<Duration>,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: None,
            max_entries: 10000,
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Import configuration.
    pub import: ImportConfig,
    /// Event worker configuration.
    pub worker: WorkerConfig,
    /// Cache configuration.
    pub cache: CacheConfig,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON log lines.
    pub log_json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            import: ImportConfig::default(),
            worker: WorkerConfig::default(),
            cache: CacheConfig::default(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup; unparseable values keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let flag = |key: &str| lookup(key).map(|v| parse_flag(&v));

        if let Some(url) = lookup("DATABASE_URL") {
            config.database.url = url;
        }
        if let Some(n) = parsed("RATESYNC_DB_MAX_CONNECTIONS") {
            config.database.max_connections = n as u32;
        }

        if let Some(code) = lookup("RATESYNC_BASE_CURRENCY") {
            config.import.base_currency = code;
        }
        if let Some(secs) = parsed("RATESYNC_IMPORT_INTERVAL_SECS") {
            config.import.interval = Duration::from_secs(secs);
        }
        if let Some(on_start) = flag("RATESYNC_IMPORT_ON_START") {
            config.import.import_on_start = on_start;
        }
        if let Some(dir) = lookup("RATESYNC_PROVIDER_DIR") {
            config.import.provider_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("RATESYNC_PROVIDER_NAME") {
            config.import.provider_name = name;
        }
        if let Some(series) = lookup("RATESYNC_SERIES") {
            config.import.series = SeriesSpec::parse_list(&series);
        }

        if let Some(secs) = parsed("RATESYNC_WORKER_POLL_SECS") {
            config.worker.poll_interval = Duration::from_secs(secs);
        }
        if let Some(n) = parsed("RATESYNC_WORKER_BATCH_SIZE") {
            config.worker.batch_size = n as usize;
        }

        if let Some(enabled) = flag("RATESYNC_CACHE_ENABLED") {
            config.cache.enabled = enabled;
        }
        if let Some(secs) = parsed("RATESYNC_CACHE_TTL_SECS") {
            config.cache.ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(n) = parsed("RATESYNC_CACHE_MAX_ENTRIES") {
            config.cache.max_entries = n as usize;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(json) = flag("RATESYNC_LOG_JSON") {
            config.log_json = json;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("Database max connections cannot be 0".to_string());
        }

        let base = Currency::parse(&self.import.base_currency)
            .map_err(|e| format!("Invalid base currency: {}", e))?;

        if self.import.interval.is_zero() {
            return Err("Import interval cannot be 0".to_string());
        }

        if self.worker.poll_interval.is_zero() {
            return Err("Worker poll interval cannot be 0".to_string());
        }

        if self.worker.batch_size == 0 {
            return Err("Worker batch size cannot be 0".to_string());
        }

        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err("Cache max entries cannot be 0 when the cache is enabled".to_string());
        }

        let mut seen = HashSet::new();
        for spec in &self.import.series {
            let new = spec.to_new_series()?;
            if new.currency == base {
                return Err(format!("Series {} duplicates the base currency", new.currency));
            }
            if !seen.insert(new.currency.clone()) {
                return Err(format!("Series {} configured more than once", new.currency));
            }
        }

        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> Result<RateEngineConfig, String> {
        let base_currency = Currency::parse(&self.import.base_currency)
            .map_err(|e| format!("Invalid base currency: {}", e))?;
        let ttl = match self.cache.ttl {
            Some(ttl) => Some(
                chrono::Duration::from_std(ttl).map_err(|e| format!("Invalid cache TTL: {}", e))?,
            ),
            None => None,
        };

        Ok(RateEngineConfig {
            base_currency,
            cache: DenseRangeCacheConfig {
                ttl,
                max_entries: self.cache.max_entries,
            },
            use_cache: self.cache.enabled,
        })
    }

    pub fn worker_config(&self) -> EventWorkerConfig {
        EventWorkerConfig {
            poll_interval: self.worker.poll_interval,
            batch_size: self.worker.batch_size,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
