//! Observation provider trait and implementations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use ratesync_common::{RateSyncError, Result};

/// Daily observations keyed by date.
pub type Observations = BTreeMap<NaiveDate, Decimal>;

/// Values providers publish for dates without an observation.
const SENTINELS: &[&str] = &["", ".", "NaN", "nan", "null", "N/A"];

/// Trait for upstream observation providers.
///
/// Implementations own transport, authentication, and timeouts. Returned maps
/// must already have missing/sentinel values filtered out.
#[async_trait]
pub trait ObservationProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Fetch observations for a series, starting at `start` when given.
    ///
    /// Providers may return dates before `start` (for example revised history);
    /// callers must not rely on the filter.
    async fn fetch_observations(
        &self,
        provider_series_id: &str,
        start: Option<NaiveDate>,
    ) -> Result<Observations>;

    /// Check whether the provider knows the series.
    async fn series_exists(&self, provider_series_id: &str) -> Result<bool>;
}

/// Reads observations from `<dir>/<provider_series_id>.json`.
///
/// Each file holds one JSON object mapping `YYYY-MM-DD` to a rate, given as a
/// string or a number. Sentinel strings such as `"."` are dropped.
pub struct JsonFileProvider {
    name: String,
    dir: PathBuf,
}

impl JsonFileProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "json-file".to_string(),
            dir: dir.into(),
        }
    }

    /// Override the provider name used in logs and errors.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn series_path(&self, provider_series_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", provider_series_id))
    }

    fn error(&self, message: impl Into<String>) -> RateSyncError {
        RateSyncError::provider(&self.name, message)
    }

    fn parse_rate(&self, path: &Path, date: NaiveDate, value: &Value) -> Result<Option<Decimal>> {
        let raw = match value {
            Value::Null => return Ok(None),
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(self.error(format!(
                    "{}: unexpected value {} for {}",
                    path.display(),
                    other,
                    date
                )))
            }
        };

        if SENTINELS.contains(&raw.as_str()) {
            return Ok(None);
        }

        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map(Some)
            .map_err(|e| {
                self.error(format!("{}: bad rate '{}' for {}: {}", path.display(), raw, date, e))
            })
    }
}

#[async_trait]
impl ObservationProvider for JsonFileProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_observations(
        &self,
        provider_series_id: &str,
        start: Option<NaiveDate>,
    ) -> Result<Observations> {
        let path = self.series_path(provider_series_id);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| self.error(format!("{}: {}", path.display(), e)))?;

        let document: BTreeMap<String, Value> = serde_json::from_str(&content)
            .map_err(|e| self.error(format!("{}: {}", path.display(), e)))?;

        let mut observations = Observations::new();
        let mut dropped = 0usize;

        for (key, value) in &document {
            let date = NaiveDate::parse_from_str(key, "%Y-%m-%d")
                .map_err(|e| self.error(format!("{}: bad date '{}': {}", path.display(), key, e)))?;

            if start.is_some_and(|s| date < s) {
                continue;
            }

            match self.parse_rate(&path, date, value)? {
                Some(rate) => {
                    observations.insert(date, rate);
                }
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            warn!(
                provider = %self.name,
                series = provider_series_id,
                dropped,
                "Dropped sentinel observations"
            );
        }

        debug!(
            provider = %self.name,
            series = provider_series_id,
            count = observations.len(),
            "Fetched observations"
        );
        Ok(observations)
    }

    async fn series_exists(&self, provider_series_id: &str) -> Result<bool> {
        let path = self.series_path(provider_series_id);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| self.error(format!("{}: {}", path.display(), e)))
    }
}

/// Mock observation provider for testing.
///
/// Returns every configured observation regardless of the requested start, the
/// way a provider re-sending revised history would.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockObservationProvider {
    name: String,
    series: dashmap::DashMap<String, Observations>,
    failures: dashmap::DashMap<String, String>,
    requests: parking_lot::Mutex<Vec<(String, Option<NaiveDate>)>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockObservationProvider {
    /// Create a new mock provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            series: dashmap::DashMap::new(),
            failures: dashmap::DashMap::new(),
            requests: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Replace all observations of a series.
    pub fn set_observations(&self, provider_series_id: &str, observations: Observations) {
        self.series.insert(provider_series_id.to_string(), observations);
    }

    /// Set a single observation.
    pub fn set_rate(&self, provider_series_id: &str, date: NaiveDate, rate: Decimal) {
        self.series
            .entry(provider_series_id.to_string())
            .or_default()
            .insert(date, rate);
    }

    /// Make every fetch of a series fail.
    pub fn fail_series(&self, provider_series_id: &str, message: impl Into<String>) {
        self.failures
            .insert(provider_series_id.to_string(), message.into());
    }

    pub fn clear_failure(&self, provider_series_id: &str) {
        self.failures.remove(provider_series_id);
    }

    /// Every `(series, start)` requested so far.
    pub fn requests(&self) -> Vec<(String, Option<NaiveDate>)> {
        self.requests.lock().clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl ObservationProvider for MockObservationProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_observations(
        &self,
        provider_series_id: &str,
        start: Option<NaiveDate>,
    ) -> Result<Observations> {
        self.requests
            .lock()
            .push((provider_series_id.to_string(), start));

        if let Some(message) = self.failures.get(provider_series_id) {
            return Err(RateSyncError::provider(&self.name, message.clone()));
        }

        Ok(self
            .series
            .get(provider_series_id)
            .map(|s| s.clone())
            .unwrap_or_default())
    }

    async fn series_exists(&self, provider_series_id: &str) -> Result<bool> {
        Ok(self.series.contains_key(provider_series_id))
    }
}
