//! Series event outbox.
//!
//! Events are written in the same transaction as the change they describe and
//! stay pending until a worker sets their completion marker.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;
use uuid::Uuid;

use ratesync_common::{
    EventId, RateSyncError, Result, SeriesEvent, SeriesEventKind, SeriesId,
};

use crate::db::Database;

const EVENT_COLUMNS: &str = "id, series_id, kind, created_at, processed_at, attempts, last_error";

#[derive(Debug, FromRow)]
struct SeriesEventRow {
    id: Uuid,
    series_id: Uuid,
    kind: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    attempts: i64,
    last_error: Option<String>,
}

impl TryFrom<SeriesEventRow> for SeriesEvent {
    type Error = RateSyncError;

    fn try_from(row: SeriesEventRow) -> Result<Self> {
        let kind = SeriesEventKind::parse(&row.kind).ok_or_else(|| {
            RateSyncError::Database(format!("unknown event kind '{}' on {}", row.kind, row.id))
        })?;

        Ok(SeriesEvent {
            id: EventId::from_uuid(row.id),
            series_id: SeriesId::from_uuid(row.series_id),
            kind,
            created_at: row.created_at,
            processed_at: row.processed_at,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
        })
    }
}

/// Access to the `series_events` table.
#[derive(Debug, Clone)]
pub struct SeriesEventStore {
    db: Database,
}

impl SeriesEventStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record an event on the caller's connection, normally inside the
    /// transaction that made the change.
    pub async fn record(
        conn: &mut SqliteConnection,
        series_id: SeriesId,
        kind: SeriesEventKind,
    ) -> Result<SeriesEvent> {
        let event = SeriesEvent {
            id: EventId::new(),
            series_id,
            kind,
            created_at: Utc::now(),
            processed_at: None,
            attempts: 0,
            last_error: None,
        };

        sqlx::query(
            "INSERT INTO series_events (id, series_id, kind, created_at, attempts) \
             VALUES (?, ?, ?, ?, 0)",
        )
        .bind(*event.id.as_uuid())
        .bind(*event.series_id.as_uuid())
        .bind(event.kind.as_str())
        .bind(event.created_at)
        .execute(&mut *conn)
        .await?;

        debug!(event_id = %event.id, series_id = %series_id, kind = %kind, "Event recorded");
        Ok(event)
    }

    /// Oldest pending events first.
    pub async fn pending(&self, limit: usize) -> Result<Vec<SeriesEvent>> {
        let rows = sqlx::query_as::<_, SeriesEventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM series_events \
             WHERE processed_at IS NULL \
             ORDER BY created_at ASC, id ASC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(SeriesEvent::try_from).collect()
    }

    /// Number of events without a completion marker.
    pub async fn count_pending(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM series_events WHERE processed_at IS NULL",
        )
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    pub async fn find(&self, id: EventId) -> Result<Option<SeriesEvent>> {
        let row = sqlx::query_as::<_, SeriesEventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM series_events WHERE id = ?"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(SeriesEvent::try_from).transpose()
    }

    /// Events recorded for a series, oldest first.
    pub async fn for_series(&self, series_id: SeriesId) -> Result<Vec<SeriesEvent>> {
        let rows = sqlx::query_as::<_, SeriesEventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM series_events WHERE series_id = ? \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(*series_id.as_uuid())
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(SeriesEvent::try_from).collect()
    }

    /// Set the completion marker. Returns `false` if the event was already
    /// processed or does not exist.
    pub async fn mark_processed(&self, id: EventId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE series_events SET processed_at = ? WHERE id = ? AND processed_at IS NULL",
        )
        .bind(Utc::now())
        .bind(*id.as_uuid())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count a failed attempt; the event stays pending.
    pub async fn record_failure(&self, id: EventId, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE series_events SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        )
        .bind(error)
        .bind(*id.as_uuid())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesRegistry;
    use ratesync_common::{Currency, NewSeries};

    #[tokio::test]
    async fn test_event_lifecycle() {
        let db = Database::in_memory().await.unwrap();
        let registry = SeriesRegistry::new(db.clone());
        let events = SeriesEventStore::new(db.clone());

        let series = registry
            .create_series(NewSeries::new(Currency::gbp(), "DEXUSUK"))
            .await
            .unwrap();

        let pending = events.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        let event = &pending[0];
        assert_eq!(event.series_id, series.id);
        assert_eq!(event.kind, SeriesEventKind::Created);
        assert!(event.is_pending());

        events.record_failure(event.id, "provider timeout").await.unwrap();
        let failed = events.find(event.id).await.unwrap().unwrap();
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("provider timeout"));
        assert!(failed.is_pending());

        assert!(events.mark_processed(event.id).await.unwrap());
        assert!(!events.mark_processed(event.id).await.unwrap());
        assert_eq!(events.count_pending().await.unwrap(), 0);
        assert!(events.pending(10).await.unwrap().is_empty());
    }
}
