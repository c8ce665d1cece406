//! Main rate engine: cached dense range queries and imports.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, instrument};

use ratesync_common::{
    Currency, DenseRatePoint, ImportResult, RateSyncError, Result, Series,
};
use ratesync_store::{Database, SeriesRegistry};

use crate::cache::{CacheKey, CacheStats, DenseRangeCache, DenseRangeCacheConfig};
use crate::dense::{validate_window, DenseRangeBuilder};
use crate::importer::{CommitHook, ImportReconciler};
use crate::provider::ObservationProvider;

/// Configuration for the rate engine.
#[derive(Debug, Clone)]
pub struct RateEngineConfig {
    /// Base currency every series is stored against.
    pub base_currency: Currency,
    /// Cache configuration.
    pub cache: DenseRangeCacheConfig,
    /// Whether to use cached ranges.
    pub use_cache: bool,
}

impl Default for RateEngineConfig {
    fn default() -> Self {
        Self {
            base_currency: Currency::usd(),
            cache: DenseRangeCacheConfig::default(),
            use_cache: true,
        }
    }
}

/// The main rate engine.
pub struct RateEngine {
    registry: SeriesRegistry,
    importer: Arc<ImportReconciler>,
    builder: DenseRangeBuilder,
    cache: Arc<DenseRangeCache>,
    config: RateEngineConfig,
}

impl RateEngine {
    /// Create a new engine over `db`, importing from `provider`.
    pub fn new(
        db: Database,
        provider: Arc<dyn ObservationProvider>,
        config: RateEngineConfig,
    ) -> Self {
        Self::with_commit_hooks(db, provider, config, Vec::new())
    }

    /// Like [`RateEngine::new`], also running `hooks` after every committed
    /// import. The cache is always cleared first.
    pub fn with_commit_hooks(
        db: Database,
        provider: Arc<dyn ObservationProvider>,
        config: RateEngineConfig,
        hooks: Vec<Arc<dyn CommitHook>>,
    ) -> Self {
        let cache = Arc::new(DenseRangeCache::with_config(config.cache.clone()));
        let importer = hooks.into_iter().fold(
            ImportReconciler::new(db.clone(), provider, config.base_currency.clone())
                .with_hook(cache.clone()),
            ImportReconciler::with_hook,
        );

        Self {
            registry: SeriesRegistry::new(db.clone()),
            importer: Arc::new(importer),
            builder: DenseRangeBuilder::new(db, config.base_currency.clone()),
            cache,
            config,
        }
    }

    /// Dense daily rates for a currency code over an optional window.
    #[instrument(skip(self))]
    pub async fn dense_range(
        &self,
        currency: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DenseRatePoint>> {
        let currency = Currency::parse(currency)?;
        validate_window(start, end)?;

        let key = CacheKey::new(currency.clone(), start, end);
        if self.config.use_cache {
            if let Some(cached) = self.cache.get(&key) {
                debug!("Using cached range");
                return Ok(cached);
            }
        }

        let token = self.cache.generation();
        let points = self.builder.build_dense_range(&currency, start, end).await?;

        if self.config.use_cache {
            self.cache.insert(key, points.clone(), token);
        }

        Ok(points)
    }

    /// Import one series.
    pub async fn import_series(&self, series: &Series) -> Result<ImportResult> {
        self.importer.import_series(series).await
    }

    /// Import the series registered for a currency code.
    pub async fn import_currency(&self, currency: &str) -> Result<ImportResult> {
        let currency = Currency::parse(currency)?;
        let series = self
            .registry
            .find_series_by_currency(&currency)
            .await?
            .ok_or_else(|| RateSyncError::NotFound(format!("no series for {}", currency)))?;

        self.importer.import_series(&series).await
    }

    /// Import a list of series as one all-or-nothing batch.
    pub async fn import_all(&self, series: &[Series]) -> Result<Vec<ImportResult>> {
        self.importer.import_all(series).await
    }

    /// Import every enabled series as one batch.
    #[instrument(skip(self))]
    pub async fn import_enabled(&self) -> Result<Vec<ImportResult>> {
        let series = self.registry.find_enabled_series().await?;
        if series.is_empty() {
            info!("No enabled series to import");
            return Ok(Vec::new());
        }

        self.importer.import_all(&series).await
    }

    /// Shared handle to the reconciler, for the event worker.
    pub fn importer(&self) -> Arc<ImportReconciler> {
        self.importer.clone()
    }

    pub fn registry(&self) -> &SeriesRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &DenseRangeCache {
        &self.cache
    }

    /// Get engine statistics.
    pub fn stats(&self) -> RateEngineStats {
        RateEngineStats {
            cache_stats: self.cache.stats(),
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone)]
pub struct RateEngineStats {
    pub cache_stats: CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockObservationProvider;
    use ratesync_common::NewSeries;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn setup_engine() -> (RateEngine, Arc<MockObservationProvider>) {
        let db = Database::in_memory().await.unwrap();
        let provider = Arc::new(MockObservationProvider::new("mock"));
        for d in 1..=5 {
            provider.set_rate("DEXUSEU", date(2024, 1, d), dec!(0.8500));
        }

        let engine = RateEngine::new(db, provider.clone(), RateEngineConfig::default());
        engine
            .registry()
            .create_series(NewSeries::new(Currency::eur(), "DEXUSEU"))
            .await
            .unwrap();
        (engine, provider)
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let (engine, _) = setup_engine().await;
        engine.import_enabled().await.unwrap();

        let first = engine
            .dense_range("eur", Some(date(2024, 1, 1)), Some(date(2024, 1, 7)))
            .await
            .unwrap();
        let second = engine
            .dense_range("EUR", Some(date(2024, 1, 1)), Some(date(2024, 1, 7)))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 7);
        let stats = engine.stats().cache_stats;
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_import_invalidates_cached_range() {
        let (engine, provider) = setup_engine().await;
        engine.import_enabled().await.unwrap();

        let before = engine.dense_range("EUR", None, None).await.unwrap();
        assert_eq!(before.len(), 5);

        provider.set_rate("DEXUSEU", date(2024, 1, 8), dec!(0.86));
        let results = engine.import_currency("EUR").await.unwrap();
        assert_eq!(results.new_count, 1);
        assert!(engine.cache().is_empty());

        let after = engine.dense_range("EUR", None, None).await.unwrap();
        assert_eq!(after.len(), 8);
        assert_eq!(after[6].published_date, date(2024, 1, 5));
        assert_eq!(after[7].rate, Some(dec!(0.86)));
    }

    #[tokio::test]
    async fn test_validation_happens_before_lookup() {
        let (engine, _) = setup_engine().await;

        let bad_code = engine.dense_range("EURO", None, None).await.unwrap_err();
        assert!(matches!(bad_code, RateSyncError::Validation { .. }));

        let bad_window = engine
            .dense_range("EUR", Some(date(2024, 2, 1)), Some(date(2024, 1, 1)))
            .await
            .unwrap_err();
        assert!(matches!(bad_window, RateSyncError::Validation { .. }));

        assert_eq!(engine.stats().cache_stats.misses, 0);
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let (engine, _) = setup_engine().await;

        let err = engine.dense_range("EUR", None, None).await.unwrap_err();
        assert!(matches!(err, RateSyncError::NotFound(_)));
        assert!(engine.cache().is_empty());
    }

    #[tokio::test]
    async fn test_extra_commit_hooks_run_after_cache_clear() {
        struct Counter(std::sync::atomic::AtomicUsize);
        impl CommitHook for Counter {
            fn after_commit(&self, results: &[ImportResult]) {
                self.0.fetch_add(results.len(), std::sync::atomic::Ordering::SeqCst);
            }
        }

        let db = Database::in_memory().await.unwrap();
        let provider = Arc::new(MockObservationProvider::new("mock"));
        provider.set_rate("DEXUSEU", date(2024, 1, 2), dec!(0.91));
        let counter = Arc::new(Counter(std::sync::atomic::AtomicUsize::new(0)));
        let engine = RateEngine::with_commit_hooks(
            db,
            provider,
            RateEngineConfig::default(),
            vec![counter.clone() as Arc<dyn CommitHook>],
        );
        engine
            .registry()
            .create_series(NewSeries::new(Currency::eur(), "DEXUSEU"))
            .await
            .unwrap();

        engine.import_enabled().await.unwrap();

        assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(engine.stats().cache_stats.invalidations, 1);
    }

    #[tokio::test]
    async fn test_import_unknown_currency() {
        let (engine, _) = setup_engine().await;

        let err = engine.import_currency("CHF").await.unwrap_err();
        assert!(matches!(err, RateSyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_import_enabled_skips_disabled_series() {
        let (engine, provider) = setup_engine().await;
        provider.set_rate("DEXJPUS", date(2024, 1, 2), dec!(141.2));
        engine
            .registry()
            .create_series(NewSeries::new(Currency::jpy(), "DEXJPUS").disabled())
            .await
            .unwrap();

        let results = engine.import_enabled().await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].currency, Currency::eur());
    }
}
