//! RateSync Service
//!
//! Runs scheduled imports of every enabled series and drains the series event
//! outbox so newly created series receive their first import in the
//! background.

pub mod config;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod state;

pub use config::{ServiceConfig, SeriesSpec};
pub use metrics::{MetricsSnapshot, ServiceMetrics};
pub use scheduler::ImportScheduler;
pub use service::RateSyncService;
pub use state::ServiceState;
