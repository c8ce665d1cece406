//! RateSync FX
//!
//! Import reconciliation and dense range reconstruction for daily exchange
//! rate series.
//!
//! # Features
//!
//! - Incremental imports that insert new observations and apply provider
//!   corrections
//! - Forward-filled daily ranges over weekends and holidays
//! - Whole-cache invalidation after every committed import
//! - Background import of newly created series through an event outbox
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ratesync_fx::{JsonFileProvider, RateEngine, RateEngineConfig};
//!
//! let provider = Arc::new(JsonFileProvider::new("data/observations"));
//! let engine = RateEngine::new(db, provider, RateEngineConfig::default());
//!
//! engine.import_enabled().await?;
//! let points = engine.dense_range("EUR", Some(start), Some(end)).await?;
//! ```

pub mod cache;
pub mod dense;
pub mod engine;
pub mod importer;
pub mod provider;
pub mod trigger;

pub use cache::{CacheKey, CacheStats, DenseRangeCache, DenseRangeCacheConfig};
pub use dense::DenseRangeBuilder;
pub use engine::{RateEngine, RateEngineConfig, RateEngineStats};
pub use importer::{CommitHook, ImportReconciler};
pub use provider::{JsonFileProvider, ObservationProvider, Observations};
pub use trigger::{
    EventTrigger, EventWorkerConfig, SeriesEventWorker, WorkerObserver, WorkerReport,
};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockObservationProvider;
