//! Series registry.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::{info, instrument};
use uuid::Uuid;

use ratesync_common::{
    Currency, NewSeries, RateSyncError, Result, Series, SeriesEventKind, SeriesId,
};

use crate::db::Database;
use crate::outbox::SeriesEventStore;

const SERIES_COLUMNS: &str =
    "id, currency_code, provider_series_id, enabled, created_at, updated_at";

#[derive(Debug, FromRow)]
struct SeriesRow {
    id: Uuid,
    currency_code: String,
    provider_series_id: String,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SeriesRow> for Series {
    fn from(row: SeriesRow) -> Self {
        Series {
            id: SeriesId::from_uuid(row.id),
            currency: Currency::new(row.currency_code),
            provider_series_id: row.provider_series_id,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Stores series metadata.
#[derive(Debug, Clone)]
pub struct SeriesRegistry {
    db: Database,
}

impl SeriesRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a series and record its `series_created` event atomically.
    #[instrument(skip(self, new), fields(currency = %new.currency))]
    pub async fn create_series(&self, new: NewSeries) -> Result<Series> {
        let now = Utc::now();
        let series = Series {
            id: SeriesId::new(),
            currency: new.currency,
            provider_series_id: new.provider_series_id,
            enabled: new.enabled,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO series ({SERIES_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"
        ))
        .bind(*series.id.as_uuid())
        .bind(series.currency.code())
        .bind(&series.provider_series_id)
        .bind(series.enabled)
        .bind(series.created_at)
        .bind(series.updated_at)
        .execute(&mut *tx)
        .await?;

        SeriesEventStore::record(&mut tx, series.id, SeriesEventKind::Created).await?;

        tx.commit().await?;

        info!(
            series_id = %series.id,
            provider_series_id = %series.provider_series_id,
            enabled = series.enabled,
            "Series created"
        );
        Ok(series)
    }

    pub async fn find_series_by_id(&self, id: SeriesId) -> Result<Option<Series>> {
        let row = sqlx::query_as::<_, SeriesRow>(&format!(
            "SELECT {SERIES_COLUMNS} FROM series WHERE id = ?"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(Series::from))
    }

    pub async fn find_series_by_currency(&self, currency: &Currency) -> Result<Option<Series>> {
        let row = sqlx::query_as::<_, SeriesRow>(&format!(
            "SELECT {SERIES_COLUMNS} FROM series WHERE currency_code = ?"
        ))
        .bind(currency.code())
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(Series::from))
    }

    /// Enabled series ordered by currency code.
    pub async fn find_enabled_series(&self) -> Result<Vec<Series>> {
        let rows = sqlx::query_as::<_, SeriesRow>(&format!(
            "SELECT {SERIES_COLUMNS} FROM series WHERE enabled = 1 ORDER BY currency_code"
        ))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(Series::from).collect())
    }

    pub async fn list_series(&self) -> Result<Vec<Series>> {
        let rows = sqlx::query_as::<_, SeriesRow>(&format!(
            "SELECT {SERIES_COLUMNS} FROM series ORDER BY currency_code"
        ))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(Series::from).collect())
    }

    pub async fn set_enabled(&self, id: SeriesId, enabled: bool) -> Result<Series> {
        let result = sqlx::query("UPDATE series SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(Utc::now())
            .bind(*id.as_uuid())
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(RateSyncError::NotFound(format!("series {}", id)));
        }

        self.find_series_by_id(id)
            .await?
            .ok_or_else(|| RateSyncError::NotFound(format!("series {}", id)))
    }

    /// Delete a series. Refused with [`RateSyncError::SeriesInUse`] while
    /// rate points reference it.
    pub async fn delete_series(&self, id: SeriesId) -> Result<()> {
        let result = sqlx::query("DELETE FROM series WHERE id = ?")
            .bind(*id.as_uuid())
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(RateSyncError::NotFound(format!("series {}", id)));
        }

        info!(series_id = %id, "Series deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::RateStore;
    use chrono::NaiveDate;
    use ratesync_common::CurrencyPair;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_create_and_find() {
        let db = Database::in_memory().await.unwrap();
        let registry = SeriesRegistry::new(db);

        let eur = registry
            .create_series(NewSeries::new(Currency::eur(), "DEXUSEU"))
            .await
            .unwrap();
        registry
            .create_series(NewSeries::new(Currency::jpy(), "DEXJPUS").disabled())
            .await
            .unwrap();

        let found = registry
            .find_series_by_currency(&Currency::eur())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, eur);

        let enabled = registry.find_enabled_series().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].currency, Currency::eur());
        assert_eq!(registry.list_series().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_currency_rolls_back_event() {
        let db = Database::in_memory().await.unwrap();
        let registry = SeriesRegistry::new(db.clone());
        let events = SeriesEventStore::new(db);

        registry
            .create_series(NewSeries::new(Currency::eur(), "DEXUSEU"))
            .await
            .unwrap();
        let err = registry
            .create_series(NewSeries::new(Currency::eur(), "OTHER"))
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(events.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_enabled() {
        let db = Database::in_memory().await.unwrap();
        let registry = SeriesRegistry::new(db);
        let series = registry
            .create_series(NewSeries::new(Currency::eur(), "DEXUSEU"))
            .await
            .unwrap();

        let disabled = registry.set_enabled(series.id, false).await.unwrap();
        assert!(!disabled.enabled);
        assert!(registry.find_enabled_series().await.unwrap().is_empty());

        let missing = registry.set_enabled(SeriesId::new(), true).await;
        assert!(matches!(missing, Err(RateSyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_restricted_while_points_exist() {
        let db = Database::in_memory().await.unwrap();
        let registry = SeriesRegistry::new(db.clone());
        let series = registry
            .create_series(NewSeries::new(Currency::eur(), "DEXUSEU"))
            .await
            .unwrap();

        let mut conn = db.acquire().await.unwrap();
        RateStore::new()
            .insert_point(
                &mut conn,
                series.id,
                &CurrencyPair::new(Currency::usd(), Currency::eur()),
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                Some(dec!(0.91)),
            )
            .await
            .unwrap();
        drop(conn);

        let err = registry.delete_series(series.id).await.unwrap_err();
        assert!(matches!(err, RateSyncError::SeriesInUse(_)), "{err}");
        assert!(registry.find_series_by_id(series.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_unused_series() {
        let db = Database::in_memory().await.unwrap();
        let registry = SeriesRegistry::new(db);
        let series = registry
            .create_series(NewSeries::new(Currency::eur(), "DEXUSEU"))
            .await
            .unwrap();

        registry.delete_series(series.id).await.unwrap();
        assert!(registry.find_series_by_id(series.id).await.unwrap().is_none());
    }
}
