//! Import reconciliation.
//!
//! Fetches observations for a series and classifies each one as new, updated,
//! or skipped against what is already stored. One series (or one whole batch)
//! is one transaction; commit hooks run only after a successful commit.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use ratesync_common::{next_day, Currency, ImportResult, Result, Series};
use ratesync_store::{Database, RateStore, SqliteConnection};

use crate::provider::{ObservationProvider, Observations};

/// Callback run after an import transaction commits.
pub trait CommitHook: Send + Sync {
    fn after_commit(&self, results: &[ImportResult]);
}

/// Reconciles provider observations into the rate store.
pub struct ImportReconciler {
    db: Database,
    store: RateStore,
    provider: Arc<dyn ObservationProvider>,
    base: Currency,
    hooks: Vec<Arc<dyn CommitHook>>,
}

impl ImportReconciler {
    /// Create a reconciler storing rates against `base`.
    pub fn new(db: Database, provider: Arc<dyn ObservationProvider>, base: Currency) -> Self {
        Self {
            db,
            store: RateStore::new(),
            provider,
            base,
            hooks: Vec::new(),
        }
    }

    /// Register a hook to run after each successful commit.
    pub fn with_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// The base currency rates are stored against.
    pub fn base(&self) -> &Currency {
        &self.base
    }

    /// Import one series in its own transaction.
    #[instrument(skip(self, series), fields(currency = %series.currency))]
    pub async fn import_series(&self, series: &Series) -> Result<ImportResult> {
        let observations = self.fetch(series).await.map_err(|e| {
            error!(error = %e, "Fetch failed, nothing written");
            e
        })?;

        let mut tx = self.db.begin_write().await?;
        let result = match self.reconcile(tx.conn()?, series, &observations).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Import failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        };

        tx.commit().await?;
        self.after_commit(std::slice::from_ref(&result));

        Ok(result)
    }

    /// Import every series inside one transaction.
    ///
    /// Any failure aborts the whole batch: nothing is written and no hook runs.
    #[instrument(skip(self, series_list), fields(series = series_list.len()))]
    pub async fn import_all(&self, series_list: &[Series]) -> Result<Vec<ImportResult>> {
        let mut fetched = Vec::with_capacity(series_list.len());
        for series in series_list {
            match self.fetch(series).await {
                Ok(observations) => fetched.push((series, observations)),
                Err(e) => {
                    error!(
                        currency = %series.currency,
                        fetched = fetched.len(),
                        error = %e,
                        "Batch import aborted before writing"
                    );
                    return Err(e);
                }
            }
        }

        let mut tx = self.db.begin_write().await?;
        let mut results = Vec::with_capacity(fetched.len());

        for (series, observations) in &fetched {
            match self.reconcile(tx.conn()?, series, observations).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(
                        currency = %series.currency,
                        completed = results.len(),
                        error = %e,
                        "Batch import aborted, rolling back"
                    );
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "Rollback failed");
                    }
                    return Err(e);
                }
            }
        }

        tx.commit().await?;
        self.after_commit(&results);

        info!(
            series = results.len(),
            written = results.iter().map(ImportResult::written).sum::<u64>(),
            "Batch import committed"
        );
        Ok(results)
    }

    fn after_commit(&self, results: &[ImportResult]) {
        for hook in &self.hooks {
            hook.after_commit(results);
        }
    }

    /// Fetch observations from the day after the last stored date.
    ///
    /// Runs before the write transaction opens, so provider latency never
    /// holds the database lock.
    async fn fetch(&self, series: &Series) -> Result<Observations> {
        let pair = series.pair(&self.base);
        let last = {
            let mut conn = self.db.acquire().await?;
            self.store.latest_date(&mut conn, &pair).await?
        };
        let start = last.and_then(next_day);

        let observations = self
            .provider
            .fetch_observations(&series.provider_series_id, start)
            .await?;
        if observations.is_empty() {
            info!(start = ?start, "No observations returned");
        }
        Ok(observations)
    }

    async fn reconcile(
        &self,
        conn: &mut SqliteConnection,
        series: &Series,
        observations: &Observations,
    ) -> Result<ImportResult> {
        let mut result = ImportResult::empty(series);
        if observations.is_empty() {
            return Ok(result);
        }

        result.earliest = observations.keys().next().copied();
        result.latest = observations.keys().next_back().copied();

        // Re-read under the write lock: another import may have committed
        // since the fetch.
        let pair = series.pair(&self.base);
        if self.store.latest_date(conn, &pair).await?.is_some() {
            self.reconcile_rows(conn, series, observations, &mut result).await?;
        } else {
            let inserted = self
                .store
                .insert_batch(conn, series.id, &pair, observations)
                .await?;
            result.new_count = inserted;
            result.skipped_count = observations.len() as u64 - inserted;
            debug!(inserted, "Initial import");
        }

        info!(
            provider_series_id = %series.provider_series_id,
            new = result.new_count,
            updated = result.updated_count,
            skipped = result.skipped_count,
            earliest = ?result.earliest,
            latest = ?result.latest,
            "Series reconciled"
        );
        Ok(result)
    }

    async fn reconcile_rows(
        &self,
        conn: &mut SqliteConnection,
        series: &Series,
        observations: &Observations,
        result: &mut ImportResult,
    ) -> Result<()> {
        let pair = series.pair(&self.base);

        for (&date, &rate) in observations {
            match self.store.find_point(conn, &pair, date).await? {
                None => match self
                    .store
                    .insert_point(conn, series.id, &pair, date, Some(rate))
                    .await
                {
                    Ok(_) => result.new_count += 1,
                    Err(e) if e.is_conflict() => {
                        warn!(date = %date, "Concurrent insert won, treating as skipped");
                        result.skipped_count += 1;
                    }
                    Err(e) => return Err(e),
                },
                Some(existing) if existing.rate == Some(rate) => result.skipped_count += 1,
                Some(existing) => {
                    info!(
                        date = %date,
                        previous = ?existing.rate,
                        corrected = %rate,
                        "Provider corrected a published rate"
                    );
                    self.store.update_rate(conn, existing.id, Some(rate)).await?;
                    result.updated_count += 1;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, DenseRangeCache};
    use crate::provider::MockObservationProvider;
    use chrono::NaiveDate;
    use ratesync_common::{CurrencyPair, NewSeries, RateSyncError};
    use ratesync_store::{DatabaseConfig, SeriesRegistry};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        db: Database,
        provider: Arc<MockObservationProvider>,
        cache: Arc<DenseRangeCache>,
        importer: ImportReconciler,
        registry: SeriesRegistry,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let provider = Arc::new(MockObservationProvider::new("mock"));
        let cache = Arc::new(DenseRangeCache::new());
        let importer = ImportReconciler::new(db.clone(), provider.clone(), Currency::usd())
            .with_hook(cache.clone());
        let registry = SeriesRegistry::new(db.clone());
        Fixture {
            db,
            provider,
            cache,
            importer,
            registry,
        }
    }

    async fn series(f: &Fixture, currency: Currency, provider_id: &str) -> Series {
        f.registry
            .create_series(NewSeries::new(currency, provider_id))
            .await
            .unwrap()
    }

    fn weekdays() -> Observations {
        (2..=6).map(|d| (date(2024, 1, d), dec!(0.9100))).collect()
    }

    async fn count(f: &Fixture) -> i64 {
        let mut conn = f.db.acquire().await.unwrap();
        RateStore::new().count_all(&mut conn).await.unwrap()
    }

    #[tokio::test]
    async fn test_initial_import_counts_all_new() {
        let f = fixture().await;
        let eur = series(&f, Currency::eur(), "DEXUSEU").await;
        f.provider.set_observations("DEXUSEU", weekdays());

        let result = f.importer.import_series(&eur).await.unwrap();

        assert_eq!(
            (result.new_count, result.updated_count, result.skipped_count),
            (5, 0, 0)
        );
        assert_eq!(result.earliest, Some(date(2024, 1, 2)));
        assert_eq!(result.latest, Some(date(2024, 1, 6)));
        assert_eq!(count(&f).await, 5);
        assert_eq!(f.provider.requests(), vec![("DEXUSEU".to_string(), None)]);
    }

    #[tokio::test]
    async fn test_reimport_is_idempotent() {
        let f = fixture().await;
        let eur = series(&f, Currency::eur(), "DEXUSEU").await;
        f.provider.set_observations("DEXUSEU", weekdays());

        f.importer.import_series(&eur).await.unwrap();
        let again = f.importer.import_series(&eur).await.unwrap();

        assert_eq!(
            (again.new_count, again.updated_count, again.skipped_count),
            (0, 0, 5)
        );
        assert_eq!(count(&f).await, 5);
        // Second fetch resumes the day after the last stored date.
        assert_eq!(
            f.provider.requests()[1],
            ("DEXUSEU".to_string(), Some(date(2024, 1, 7)))
        );
    }

    #[tokio::test]
    async fn test_trailing_zeros_are_not_a_change() {
        let f = fixture().await;
        let eur = series(&f, Currency::eur(), "DEXUSEU").await;
        f.provider.set_rate("DEXUSEU", date(2024, 1, 2), dec!(0.85));
        f.importer.import_series(&eur).await.unwrap();

        f.provider.set_rate("DEXUSEU", date(2024, 1, 2), dec!(0.850000));
        let result = f.importer.import_series(&eur).await.unwrap();

        assert_eq!((result.updated_count, result.skipped_count), (0, 1));
    }

    #[tokio::test]
    async fn test_correction_updates_single_row() {
        let f = fixture().await;
        let eur = series(&f, Currency::eur(), "DEXUSEU").await;
        f.provider.set_observations("DEXUSEU", weekdays());
        f.importer.import_series(&eur).await.unwrap();

        f.provider.set_rate("DEXUSEU", date(2024, 1, 4), dec!(0.9150));
        let result = f.importer.import_series(&eur).await.unwrap();

        assert_eq!(
            (result.new_count, result.updated_count, result.skipped_count),
            (0, 1, 4)
        );

        let mut conn = f.db.acquire().await.unwrap();
        let pair = CurrencyPair::new(Currency::usd(), Currency::eur());
        let corrected = RateStore::new()
            .find_point(&mut conn, &pair, date(2024, 1, 4))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(corrected.rate, Some(dec!(0.915)));
    }

    #[tokio::test]
    async fn test_incremental_import_mixes_new_and_skipped() {
        let f = fixture().await;
        let eur = series(&f, Currency::eur(), "DEXUSEU").await;
        f.provider.set_observations("DEXUSEU", weekdays());
        f.importer.import_series(&eur).await.unwrap();

        f.provider.set_rate("DEXUSEU", date(2024, 1, 9), dec!(0.92));
        f.provider.set_rate("DEXUSEU", date(2024, 1, 8), dec!(0.92));
        let result = f.importer.import_series(&eur).await.unwrap();

        assert_eq!(
            (result.new_count, result.updated_count, result.skipped_count),
            (2, 0, 5)
        );
        assert_eq!(count(&f).await, 7);
    }

    #[tokio::test]
    async fn test_empty_fetch_returns_zero_result() {
        let f = fixture().await;
        let eur = series(&f, Currency::eur(), "DEXUSEU").await;

        let result = f.importer.import_series(&eur).await.unwrap();

        assert_eq!(result.total(), 0);
        assert_eq!(result.earliest, None);
        assert_eq!(result.latest, None);
    }

    #[tokio::test]
    async fn test_commit_clears_cache() {
        let f = fixture().await;
        let eur = series(&f, Currency::eur(), "DEXUSEU").await;
        f.provider.set_observations("DEXUSEU", weekdays());
        f.cache.insert(
            CacheKey::new(Currency::eur(), None, None),
            Vec::new(),
            f.cache.generation(),
        );

        f.importer.import_series(&eur).await.unwrap();

        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_rolls_back_whole_batch() {
        let f = fixture().await;
        let eur = series(&f, Currency::eur(), "DEXUSEU").await;
        let gbp = series(&f, Currency::gbp(), "DEXUSUK").await;
        f.provider.set_observations("DEXUSEU", weekdays());
        f.provider.set_observations("DEXUSUK", weekdays());
        f.importer.import_all(&[eur.clone()]).await.unwrap();

        f.cache.insert(
            CacheKey::new(Currency::eur(), None, None),
            Vec::new(),
            f.cache.generation(),
        );
        let rows_before = count(&f).await;
        let cache_before = f.cache.entries();
        let invalidations_before = f.cache.stats().invalidations;

        f.provider.set_rate("DEXUSEU", date(2024, 1, 9), dec!(0.93));
        f.provider.fail_series("DEXUSUK", "503 Service Unavailable");
        let err = f.importer.import_all(&[eur, gbp]).await.unwrap_err();

        assert!(matches!(err, RateSyncError::Provider { .. }));
        assert_eq!(count(&f).await, rows_before);
        assert_eq!(f.cache.entries(), cache_before);
        assert_eq!(f.cache.stats().invalidations, invalidations_before);
    }

    #[tokio::test]
    async fn test_import_all_commits_every_series() {
        let f = fixture().await;
        let eur = series(&f, Currency::eur(), "DEXUSEU").await;
        let gbp = series(&f, Currency::gbp(), "DEXUSUK").await;
        f.provider.set_observations("DEXUSEU", weekdays());
        f.provider.set_rate("DEXUSUK", date(2024, 1, 2), dec!(0.79));

        let results = f.importer.import_all(&[eur, gbp]).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].new_count, 5);
        assert_eq!(results[1].new_count, 1);
        assert_eq!(count(&f).await, 6);
        assert_eq!(f.cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_unique_violation_on_insert_counts_as_skipped() {
        let f = fixture().await;
        let eur = series(&f, Currency::eur(), "DEXUSEU").await;
        f.provider.set_observations("DEXUSEU", weekdays());
        f.importer.import_series(&eur).await.unwrap();

        // Another writer lands 2024-01-09 between the lookup and the insert.
        sqlx::query(
            "CREATE TRIGGER competing_insert BEFORE INSERT ON rate_points
             WHEN NEW.rate_date = '2024-01-09'
             BEGIN
                 INSERT INTO rate_points
                     (id, series_id, base_currency, target_currency, rate_date, rate, created_at, updated_at)
                 VALUES
                     (randomblob(16), NEW.series_id, NEW.base_currency, NEW.target_currency,
                      NEW.rate_date, NEW.rate, NEW.created_at, NEW.updated_at);
             END",
        )
        .execute(f.db.pool())
        .await
        .unwrap();

        f.provider.set_rate("DEXUSEU", date(2024, 1, 8), dec!(0.92));
        f.provider.set_rate("DEXUSEU", date(2024, 1, 9), dec!(0.93));
        let result = f.importer.import_series(&eur).await.unwrap();

        assert_eq!(
            (result.new_count, result.updated_count, result.skipped_count),
            (1, 0, 6)
        );
        // The aborted statement also discards the trigger's row.
        assert_eq!(count(&f).await, 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_imports_on_file_database_both_commit() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("rates.db").display()),
            ..DatabaseConfig::default()
        };
        let db = Database::connect(&config).await.unwrap();
        let provider = Arc::new(MockObservationProvider::new("mock"));
        let importer = Arc::new(ImportReconciler::new(
            db.clone(),
            provider.clone(),
            Currency::usd(),
        ));
        let eur = SeriesRegistry::new(db.clone())
            .create_series(NewSeries::new(Currency::eur(), "DEXUSEU"))
            .await
            .unwrap();
        provider.set_observations("DEXUSEU", weekdays());

        for round in 0..10u32 {
            if round > 0 {
                let day = date(2024, 1, 6) + chrono::Duration::days(round as i64);
                provider.set_rate("DEXUSEU", day, dec!(0.92));
            }
            let total = 5 + round as u64;
            let added = if round == 0 { 5 } else { 1 };

            let single = {
                let importer = importer.clone();
                let eur = eur.clone();
                tokio::spawn(async move { importer.import_series(&eur).await })
            };
            let batch = {
                let importer = importer.clone();
                let eur = eur.clone();
                tokio::spawn(async move { importer.import_all(&[eur]).await })
            };

            let single = single.await.unwrap().unwrap();
            let mut batch = batch.await.unwrap().unwrap();
            let mut results = vec![single, batch.remove(0)];
            results.sort_by_key(|r| r.new_count);

            assert_eq!(
                (results[0].new_count, results[0].skipped_count),
                (0, total),
                "round {round}"
            );
            assert_eq!(
                (results[1].new_count, results[1].skipped_count),
                (added, total - added),
                "round {round}"
            );
        }

        assert_eq!(count_on(&db).await, 14);
        db.close().await;
    }

    async fn count_on(db: &Database) -> i64 {
        let mut conn = db.acquire().await.unwrap();
        RateStore::new().count_all(&mut conn).await.unwrap()
    }
}
