//! Rate point repository.
//!
//! Every method takes an explicit connection so callers decide the
//! transaction boundary: pass `&mut *tx` to take part in an open transaction,
//! or a pooled connection for standalone reads.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};
use tracing::debug;
use uuid::Uuid;

use ratesync_common::{
    Currency, CurrencyPair, RatePoint, RatePointId, RateSyncError, Result, SeriesId,
};

/// Rows per multi-row insert; 8 binds per row stays under SQLite's bind limit.
const BATCH_CHUNK: usize = 100;

const POINT_COLUMNS: &str =
    "id, series_id, base_currency, target_currency, rate_date, rate, created_at, updated_at";

#[derive(Debug, FromRow)]
struct RatePointRow {
    id: Uuid,
    series_id: Uuid,
    base_currency: String,
    target_currency: String,
    rate_date: NaiveDate,
    rate: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RatePointRow> for RatePoint {
    type Error = RateSyncError;

    fn try_from(row: RatePointRow) -> Result<Self> {
        let rate = row
            .rate
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .map_err(|e| {
                RateSyncError::Database(format!("corrupt rate on {}: {}", row.rate_date, e))
            })?;

        Ok(RatePoint {
            id: RatePointId::from_uuid(row.id),
            series_id: SeriesId::from_uuid(row.series_id),
            base: Currency::new(row.base_currency),
            target: Currency::new(row.target_currency),
            date: row.rate_date,
            rate,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_points(rows: Vec<RatePointRow>) -> Result<Vec<RatePoint>> {
    rows.into_iter().map(RatePoint::try_from).collect()
}

/// Queries and writes against the `rate_points` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateStore;

impl RateStore {
    pub fn new() -> Self {
        Self
    }

    /// Most recent stored date for a pair.
    pub async fn latest_date(
        &self,
        conn: &mut SqliteConnection,
        pair: &CurrencyPair,
    ) -> Result<Option<NaiveDate>> {
        let date = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT rate_date FROM rate_points \
             WHERE base_currency = ? AND target_currency = ? \
             ORDER BY rate_date DESC LIMIT 1",
        )
        .bind(pair.base.code())
        .bind(pair.target.code())
        .fetch_optional(&mut *conn)
        .await?;

        Ok(date)
    }

    /// Whether any point exists for a pair.
    pub async fn has_points(&self, conn: &mut SqliteConnection, pair: &CurrencyPair) -> Result<bool> {
        Ok(self.count_points(conn, pair).await? > 0)
    }

    /// Number of stored points for a pair.
    pub async fn count_points(
        &self,
        conn: &mut SqliteConnection,
        pair: &CurrencyPair,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM rate_points WHERE base_currency = ? AND target_currency = ?",
        )
        .bind(pair.base.code())
        .bind(pair.target.code())
        .fetch_one(&mut *conn)
        .await?;

        Ok(count)
    }

    /// Number of stored points across all pairs.
    pub async fn count_all(&self, conn: &mut SqliteConnection) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM rate_points")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    /// The point stored at exactly `date`.
    pub async fn find_point(
        &self,
        conn: &mut SqliteConnection,
        pair: &CurrencyPair,
        date: NaiveDate,
    ) -> Result<Option<RatePoint>> {
        let row = sqlx::query_as::<_, RatePointRow>(&format!(
            "SELECT {POINT_COLUMNS} FROM rate_points \
             WHERE base_currency = ? AND target_currency = ? AND rate_date = ?"
        ))
        .bind(pair.base.code())
        .bind(pair.target.code())
        .bind(date)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(RatePoint::try_from).transpose()
    }

    /// Insert a single point.
    ///
    /// A duplicate (base, target, date) fails with
    /// [`RateSyncError::PersistenceConflict`].
    pub async fn insert_point(
        &self,
        conn: &mut SqliteConnection,
        series_id: SeriesId,
        pair: &CurrencyPair,
        date: NaiveDate,
        rate: Option<Decimal>,
    ) -> Result<RatePoint> {
        let now = Utc::now();
        let point = RatePoint {
            id: RatePointId::new(),
            series_id,
            base: pair.base.clone(),
            target: pair.target.clone(),
            date,
            rate,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(&format!(
            "INSERT INTO rate_points ({POINT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(*point.id.as_uuid())
        .bind(*point.series_id.as_uuid())
        .bind(point.base.code())
        .bind(point.target.code())
        .bind(point.date)
        .bind(point.rate.map(|r| r.to_string()))
        .bind(point.created_at)
        .bind(point.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(point)
    }

    /// Insert many points for a pair known to be empty.
    ///
    /// Rows that collide with an existing (base, target, date) are left
    /// untouched. Returns how many rows were actually inserted.
    pub async fn insert_batch(
        &self,
        conn: &mut SqliteConnection,
        series_id: SeriesId,
        pair: &CurrencyPair,
        observations: &BTreeMap<NaiveDate, Decimal>,
    ) -> Result<u64> {
        let rows: Vec<(NaiveDate, Decimal)> =
            observations.iter().map(|(d, r)| (*d, *r)).collect();
        let mut inserted = 0;

        for chunk in rows.chunks(BATCH_CHUNK) {
            let now = Utc::now();
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT INTO rate_points ({POINT_COLUMNS}) "));

            builder.push_values(chunk.iter().copied(), |mut row, (date, rate)| {
                row.push_bind(Uuid::now_v7())
                    .push_bind(*series_id.as_uuid())
                    .push_bind(pair.base.code().to_string())
                    .push_bind(pair.target.code().to_string())
                    .push_bind(date)
                    .push_bind(Some(rate.to_string()))
                    .push_bind(now)
                    .push_bind(now);
            });
            builder.push(" ON CONFLICT (base_currency, target_currency, rate_date) DO NOTHING");

            let result = builder.build().execute(&mut *conn).await?;
            inserted += result.rows_affected();
        }

        debug!(pair = %pair, rows = rows.len(), inserted, "Batch insert");
        Ok(inserted)
    }

    /// Overwrite the rate of an existing point.
    pub async fn update_rate(
        &self,
        conn: &mut SqliteConnection,
        id: RatePointId,
        rate: Option<Decimal>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE rate_points SET rate = ?, updated_at = ? WHERE id = ?")
            .bind(rate.map(|r| r.to_string()))
            .bind(Utc::now())
            .bind(*id.as_uuid())
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RateSyncError::NotFound(format!("rate point {}", id)));
        }
        Ok(())
    }

    /// Points for a pair intersecting `[start, end]`, ascending by date.
    /// Absent bounds are open.
    pub async fn points_in_range(
        &self,
        conn: &mut SqliteConnection,
        pair: &CurrencyPair,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<RatePoint>> {
        let rows = sqlx::query_as::<_, RatePointRow>(&format!(
            "SELECT {POINT_COLUMNS} FROM rate_points \
             WHERE base_currency = ? AND target_currency = ? \
               AND (? IS NULL OR rate_date >= ?) \
               AND (? IS NULL OR rate_date <= ?) \
             ORDER BY rate_date ASC"
        ))
        .bind(pair.base.code())
        .bind(pair.target.code())
        .bind(start)
        .bind(start)
        .bind(end)
        .bind(end)
        .fetch_all(&mut *conn)
        .await?;

        into_points(rows)
    }

    /// Most recent point strictly before `date`.
    pub async fn latest_before(
        &self,
        conn: &mut SqliteConnection,
        pair: &CurrencyPair,
        date: NaiveDate,
    ) -> Result<Option<RatePoint>> {
        let row = sqlx::query_as::<_, RatePointRow>(&format!(
            "SELECT {POINT_COLUMNS} FROM rate_points \
             WHERE base_currency = ? AND target_currency = ? AND rate_date < ? \
             ORDER BY rate_date DESC LIMIT 1"
        ))
        .bind(pair.base.code())
        .bind(pair.target.code())
        .bind(date)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(RatePoint::try_from).transpose()
    }
}
