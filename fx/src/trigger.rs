//! Import triggering on series creation.
//!
//! Creating a series writes a `series_created` event in the same transaction
//! as the series row. The [`SeriesEventWorker`] drains pending events in the
//! background, imports the series, and sets the event's completion marker.
//! Delivery is at least once; a redelivered event re-runs an import that the
//! reconciler turns into an all-skipped result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, instrument, warn};

use ratesync_common::{NewSeries, Result, Series, SeriesEvent};
use ratesync_store::{Database, SeriesEventStore, SeriesRegistry};

use crate::importer::ImportReconciler;

/// Creates series and wakes the event worker.
#[derive(Clone)]
pub struct EventTrigger {
    registry: SeriesRegistry,
    notify: Arc<Notify>,
}

impl EventTrigger {
    pub fn new(registry: SeriesRegistry, notify: Arc<Notify>) -> Self {
        Self { registry, notify }
    }

    /// Create a series. Returns once the series and its event are committed;
    /// the import runs later on the worker.
    pub async fn create_series(&self, new: NewSeries) -> Result<Series> {
        let series = self.registry.create_series(new).await?;
        self.notify.notify_one();
        Ok(series)
    }
}

/// Configuration for the event worker.
#[derive(Debug, Clone)]
pub struct EventWorkerConfig {
    /// Fallback wake-up for events whose notification was missed.
    pub poll_interval: Duration,
    /// Events handled per pass.
    pub batch_size: usize,
}

impl Default for EventWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 50,
        }
    }
}

/// Outcome of one pass over pending events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Events whose series was imported.
    pub imported: usize,
    /// Events completed without import because the series is disabled.
    pub skipped_disabled: usize,
    /// Events whose series no longer exists.
    pub orphaned: usize,
    /// Events left pending after a failed import.
    pub failed: usize,
}

impl WorkerReport {
    pub fn handled(&self) -> usize {
        self.imported + self.skipped_disabled + self.orphaned + self.failed
    }
}

/// Receives the report of every worker pass.
pub trait WorkerObserver: Send + Sync {
    fn on_report(&self, report: &WorkerReport);
}

enum Outcome {
    Imported,
    Disabled,
    Orphaned,
    Failed,
}

/// Background consumer of the series event outbox.
pub struct SeriesEventWorker {
    events: SeriesEventStore,
    registry: SeriesRegistry,
    importer: Arc<ImportReconciler>,
    notify: Arc<Notify>,
    config: EventWorkerConfig,
    observers: Vec<Arc<dyn WorkerObserver>>,
}

impl SeriesEventWorker {
    pub fn new(
        db: Database,
        importer: Arc<ImportReconciler>,
        notify: Arc<Notify>,
        config: EventWorkerConfig,
    ) -> Self {
        Self {
            events: SeriesEventStore::new(db.clone()),
            registry: SeriesRegistry::new(db),
            importer,
            notify,
            config,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Handle up to `batch_size` pending events, oldest first.
    #[instrument(skip(self))]
    pub async fn process_pending(&self) -> Result<WorkerReport> {
        let pending = self.events.pending(self.config.batch_size).await?;
        let mut report = WorkerReport::default();

        for event in &pending {
            match self.handle(event).await? {
                Outcome::Imported => report.imported += 1,
                Outcome::Disabled => report.skipped_disabled += 1,
                Outcome::Orphaned => report.orphaned += 1,
                Outcome::Failed => report.failed += 1,
            }
        }

        if report.handled() > 0 {
            info!(
                imported = report.imported,
                skipped_disabled = report.skipped_disabled,
                orphaned = report.orphaned,
                failed = report.failed,
                "Processed series events"
            );
        }
        for observer in &self.observers {
            observer.on_report(&report);
        }
        Ok(report)
    }

    async fn handle(&self, event: &SeriesEvent) -> Result<Outcome> {
        let Some(series) = self.registry.find_series_by_id(event.series_id).await? else {
            warn!(event_id = %event.id, series_id = %event.series_id, "Event for unknown series");
            self.complete(event).await?;
            return Ok(Outcome::Orphaned);
        };

        if !series.enabled {
            debug!(event_id = %event.id, currency = %series.currency, "Series disabled, not importing");
            self.complete(event).await?;
            return Ok(Outcome::Disabled);
        }

        match self.importer.import_series(&series).await {
            Ok(result) => {
                info!(event_id = %event.id, %result, "Initial import finished");
                self.complete(event).await?;
                Ok(Outcome::Imported)
            }
            Err(e) => {
                error!(
                    event_id = %event.id,
                    currency = %series.currency,
                    attempts = event.attempts + 1,
                    error = %e,
                    "Initial import failed"
                );
                self.events.record_failure(event.id, &e.to_string()).await?;
                Ok(Outcome::Failed)
            }
        }
    }

    async fn complete(&self, event: &SeriesEvent) -> Result<()> {
        if !self.events.mark_processed(event.id).await? {
            debug!(event_id = %event.id, "Event already processed");
        }
        Ok(())
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Series event worker started"
        );

        while !*shutdown.borrow() {
            if let Err(e) = self.process_pending().await {
                error!(error = %e, "Failed to process series events");
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Series event worker stopped");
    }
}
