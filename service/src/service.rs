//! Service wiring and lifecycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use ratesync_common::{RateSyncError, Result, Series};
use ratesync_fx::{
    CommitHook, EventTrigger, ObservationProvider, RateEngine, SeriesEventWorker, WorkerObserver,
};
use ratesync_store::{Database, SeriesRegistry};

use crate::config::ServiceConfig;
use crate::metrics::ServiceMetrics;
use crate::scheduler::ImportScheduler;
use crate::state::ServiceState;

/// How long `stop` waits for background tasks before abandoning them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// The running import service.
pub struct RateSyncService {
    config: ServiceConfig,
    engine: Arc<RateEngine>,
    trigger: EventTrigger,
    worker: Arc<SeriesEventWorker>,
    scheduler: Arc<ImportScheduler>,
    metrics: Arc<ServiceMetrics>,
    state: RwLock<ServiceState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RateSyncService {
    /// Wire the engine, event worker, and scheduler over `db`.
    pub fn new(
        config: ServiceConfig,
        db: Database,
        provider: Arc<dyn ObservationProvider>,
    ) -> Result<Self> {
        let engine_config = config.engine_config().map_err(RateSyncError::Configuration)?;
        let metrics = Arc::new(ServiceMetrics::new());

        let engine = Arc::new(RateEngine::with_commit_hooks(
            db.clone(),
            provider,
            engine_config,
            vec![metrics.clone() as Arc<dyn CommitHook>],
        ));

        let notify = Arc::new(Notify::new());
        let trigger = EventTrigger::new(SeriesRegistry::new(db.clone()), notify.clone());
        let worker = Arc::new(
            SeriesEventWorker::new(db, engine.importer(), notify, config.worker_config())
                .with_observer(metrics.clone() as Arc<dyn WorkerObserver>),
        );
        let scheduler = Arc::new(ImportScheduler::new(
            engine.clone(),
            metrics.clone(),
            config.import.interval,
            config.import.import_on_start,
        ));

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            engine,
            trigger,
            worker,
            scheduler,
            metrics,
            state: RwLock::new(ServiceState::Starting),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Register configured series that do not exist yet.
    ///
    /// New series go through the event trigger, so their first import runs on
    /// the worker.
    #[instrument(skip(self))]
    pub async fn seed_series(&self) -> Result<Vec<Series>> {
        let mut created = Vec::new();

        for spec in &self.config.import.series {
            let new = spec.to_new_series().map_err(RateSyncError::Configuration)?;

            let registered = self
                .engine
                .registry()
                .find_series_by_currency(&new.currency)
                .await?;
            if let Some(existing) = registered {
                if existing.provider_series_id != new.provider_series_id {
                    warn!(
                        currency = %existing.currency,
                        registered = %existing.provider_series_id,
                        configured = %new.provider_series_id,
                        "Configured series differs from registered series, keeping registered"
                    );
                }
                continue;
            }

            match self.trigger.create_series(new).await {
                Ok(series) => {
                    info!(currency = %series.currency, series_id = %series.id, "Series registered");
                    created.push(series);
                }
                // Another instance registered it first.
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(created)
    }

    /// Start the background tasks.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        info!("Starting service");

        let worker = self.worker.clone();
        let worker_shutdown = self.shutdown_tx.subscribe();
        let scheduler = self.scheduler.clone();
        let scheduler_shutdown = self.shutdown_tx.subscribe();

        {
            let mut tasks = self.tasks.lock();
            tasks.push(tokio::spawn(worker.run(worker_shutdown)));
            tasks.push(tokio::spawn(scheduler.run(scheduler_shutdown)));
        }

        *self.state.write() = ServiceState::Running;
        info!("Service started");
        Ok(())
    }

    /// Stop the service gracefully.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping service");
        *self.state.write() = ServiceState::ShuttingDown;

        self.shutdown_tx.send_replace(true);

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Background task panicked"),
                Err(_) => warn!("Background task did not stop in time"),
            }
        }

        *self.state.write() = ServiceState::Stopped;
        info!(metrics = ?self.metrics.snapshot(), "Service stopped");
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    pub fn engine(&self) -> &Arc<RateEngine> {
        &self.engine
    }

    pub fn trigger(&self) -> &EventTrigger {
        &self.trigger
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }
}
