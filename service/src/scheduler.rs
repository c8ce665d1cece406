//! Periodic import of every enabled series.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use ratesync_common::{ImportResult, Result};
use ratesync_fx::RateEngine;

use crate::metrics::ServiceMetrics;

/// Drives `import_enabled` on a fixed interval.
pub struct ImportScheduler {
    engine: Arc<RateEngine>,
    metrics: Arc<ServiceMetrics>,
    interval: Duration,
    import_on_start: bool,
}

impl ImportScheduler {
    pub fn new(
        engine: Arc<RateEngine>,
        metrics: Arc<ServiceMetrics>,
        interval: Duration,
        import_on_start: bool,
    ) -> Self {
        Self {
            engine,
            metrics,
            interval,
            import_on_start,
        }
    }

    /// Run one import of all enabled series.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<Vec<ImportResult>> {
        self.metrics.import_run_started();

        match self.engine.import_enabled().await {
            Ok(results) => {
                for result in &results {
                    info!(%result, "Series imported");
                }
                Ok(results)
            }
            Err(e) => {
                self.metrics.import_run_failed();
                Err(e)
            }
        }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            import_on_start = self.import_on_start,
            "Import scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.import_on_start {
            // The first tick completes immediately.
            ticker.tick().await;
        }

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, retryable = e.is_retryable(), "Scheduled import failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Import scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ratesync_common::{Currency, NewSeries};
    use ratesync_fx::{CommitHook, MockObservationProvider, RateEngineConfig};
    use ratesync_store::Database;
    use rust_decimal_macros::dec;

    async fn setup() -> (Arc<ImportScheduler>, Arc<MockObservationProvider>, Arc<ServiceMetrics>) {
        let db = Database::in_memory().await.unwrap();
        let provider = Arc::new(MockObservationProvider::new("mock"));
        provider.set_rate(
            "DEXUSEU",
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            dec!(0.91),
        );
        let metrics = Arc::new(ServiceMetrics::new());
        let engine = Arc::new(RateEngine::with_commit_hooks(
            db,
            provider.clone(),
            RateEngineConfig::default(),
            vec![metrics.clone() as Arc<dyn CommitHook>],
        ));
        engine
            .registry()
            .create_series(NewSeries::new(Currency::eur(), "DEXUSEU"))
            .await
            .unwrap();

        let scheduler = Arc::new(ImportScheduler::new(
            engine,
            metrics.clone(),
            Duration::from_secs(3600),
            true,
        ));
        (scheduler, provider, metrics)
    }

    #[tokio::test]
    async fn test_run_once_records_metrics() {
        let (scheduler, _, metrics) = setup().await;

        let results = scheduler.run_once().await.unwrap();

        assert_eq!(results.len(), 1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.import_runs, 1);
        assert_eq!(snapshot.import_runs_failed, 0);
        assert_eq!(snapshot.rows_new, 1);
    }

    #[tokio::test]
    async fn test_failed_run_is_counted() {
        let (scheduler, provider, metrics) = setup().await;
        provider.fail_series("DEXUSEU", "timeout");

        assert!(scheduler.run_once().await.is_err());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.import_runs_failed, 1);
        assert_eq!(snapshot.rows_new, 0);
    }

    #[tokio::test]
    async fn test_run_imports_on_start_and_stops() {
        let (scheduler, _, metrics) = setup().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(5), async {
            while metrics.snapshot().series_imported == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metrics.snapshot().import_runs, 1);
    }
}
