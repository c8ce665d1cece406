//! Metrics collection for service monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use ratesync_common::ImportResult;
use ratesync_fx::{CommitHook, WorkerObserver, WorkerReport};

/// Service metrics.
pub struct ServiceMetrics {
    /// Scheduled import runs started.
    pub import_runs: AtomicU64,
    /// Scheduled import runs that rolled back.
    pub import_runs_failed: AtomicU64,
    /// Committed series imports, scheduled or event-driven.
    pub series_imported: AtomicU64,
    /// Rate points inserted.
    pub rows_new: AtomicU64,
    /// Rate points corrected.
    pub rows_updated: AtomicU64,
    /// Observations that matched the stored rate.
    pub rows_skipped: AtomicU64,
    /// Series events completed.
    pub events_processed: AtomicU64,
    /// Series event attempts that failed.
    pub events_failed: AtomicU64,
}

impl ServiceMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            import_runs: AtomicU64::new(0),
            import_runs_failed: AtomicU64::new(0),
            series_imported: AtomicU64::new(0),
            rows_new: AtomicU64::new(0),
            rows_updated: AtomicU64::new(0),
            rows_skipped: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
        }
    }

    pub fn import_run_started(&self) {
        self.import_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn import_run_failed(&self) {
        self.import_runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record committed import results.
    pub fn record_results(&self, results: &[ImportResult]) {
        self.series_imported
            .fetch_add(results.len() as u64, Ordering::Relaxed);
        for result in results {
            self.rows_new.fetch_add(result.new_count, Ordering::Relaxed);
            self.rows_updated
                .fetch_add(result.updated_count, Ordering::Relaxed);
            self.rows_skipped
                .fetch_add(result.skipped_count, Ordering::Relaxed);
        }
    }

    /// Record one pass of the event worker.
    pub fn record_worker_report(&self, report: &WorkerReport) {
        let processed = report.imported + report.skipped_disabled + report.orphaned;
        self.events_processed
            .fetch_add(processed as u64, Ordering::Relaxed);
        self.events_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            import_runs: self.import_runs.load(Ordering::Relaxed),
            import_runs_failed: self.import_runs_failed.load(Ordering::Relaxed),
            series_imported: self.series_imported.load(Ordering::Relaxed),
            rows_new: self.rows_new.load(Ordering::Relaxed),
            rows_updated: self.rows_updated.load(Ordering::Relaxed),
            rows_skipped: self.rows_skipped.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitHook for ServiceMetrics {
    fn after_commit(&self, results: &[ImportResult]) {
        self.record_results(results);
    }
}

impl WorkerObserver for ServiceMetrics {
    fn on_report(&self, report: &WorkerReport) {
        self.record_worker_report(report);
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub import_runs: u64,
    pub import_runs_failed: u64,
    pub series_imported: u64,
    pub rows_new: u64,
    pub rows_updated: u64,
    pub rows_skipped: u64,
    pub events_processed: u64,
    pub events_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ratesync_common::Currency;

    fn result(new_count: u64, updated_count: u64, skipped_count: u64) -> ImportResult {
        ImportResult {
            currency: Currency::eur(),
            provider_series_id: "DEXUSEU".to_string(),
            new_count,
            updated_count,
            skipped_count,
            earliest: None,
            latest: None,
            imported_at: Utc::now(),
        }
    }

    #[test]
    fn test_commit_hook_counts_rows() {
        let metrics = ServiceMetrics::new();

        metrics.after_commit(&[result(3, 1, 2), result(0, 0, 5)]);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.series_imported, 2);
        assert_eq!(snapshot.rows_new, 3);
        assert_eq!(snapshot.rows_updated, 1);
        assert_eq!(snapshot.rows_skipped, 7);
    }

    #[test]
    fn test_worker_reports() {
        let metrics = ServiceMetrics::new();

        metrics.on_report(&WorkerReport {
            imported: 2,
            skipped_disabled: 1,
            orphaned: 0,
            failed: 1,
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_processed, 3);
        assert_eq!(snapshot.events_failed, 1);
    }
}
