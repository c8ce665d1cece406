//! Dense range reconstruction.
//!
//! Turns sparse stored points into exactly one value per calendar day by
//! forward-filling the most recent known rate. Days before the first known
//! rate are omitted.

use chrono::NaiveDate;
use tracing::{debug, instrument};

use ratesync_common::{
    Currency, CurrencyPair, DateRange, DenseRatePoint, RatePoint, RateSyncError, Result,
};
use ratesync_store::{Database, RateStore};

/// Read-only builder of dense ranges. Safe to share across tasks.
#[derive(Debug, Clone)]
pub struct DenseRangeBuilder {
    db: Database,
    store: RateStore,
    base: Currency,
}

impl DenseRangeBuilder {
    pub fn new(db: Database, base: Currency) -> Self {
        Self {
            db,
            store: RateStore::new(),
            base,
        }
    }

    /// One point per day of `[start, end]` for `currency`.
    ///
    /// Absent bounds default to the first/last stored date in the window.
    /// Fails with `NotFound` only when the currency has no stored points at
    /// all; a window without data yields an empty list.
    #[instrument(skip(self, currency), fields(currency = %currency))]
    pub async fn build_dense_range(
        &self,
        currency: &Currency,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DenseRatePoint>> {
        validate_window(start, end)?;

        let pair = CurrencyPair::new(self.base.clone(), currency.clone());
        let mut conn = self.db.acquire().await?;

        let rows = self.store.points_in_range(&mut conn, &pair, start, end).await?;

        let (first, last) = match (rows.first(), rows.last()) {
            (Some(first), Some(last)) => (first.date, last.date),
            _ => {
                if self.store.has_points(&mut conn, &pair).await? {
                    debug!("No stored points in window");
                    return Ok(Vec::new());
                }
                return Err(RateSyncError::NotFound(format!(
                    "no rates stored for {}",
                    currency
                )));
            }
        };

        let effective_start = start.unwrap_or(first);
        let effective_end = end.unwrap_or(last);

        let seed = if first > effective_start {
            self.store
                .latest_before(&mut conn, &pair, effective_start)
                .await?
        } else {
            None
        };

        let points = fill_forward(&pair, effective_start, effective_end, &rows, seed);
        debug!(
            stored = rows.len(),
            dense = points.len(),
            seeded = points.first().is_some_and(|p| p.published_date < effective_start),
            "Dense range built"
        );
        Ok(points)
    }
}

/// Reject windows whose start lies after their end.
pub fn validate_window(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(RateSyncError::invalid_field(
                "start_date",
                format!("start {} is after end {}", start, end),
            ));
        }
    }
    Ok(())
}

/// Walk every day of `[start, end]`, carrying the latest known point forward.
///
/// `rows` must be sorted by date; rows dated before `start` only seed the
/// carry. `seed` is the latest point before `start`, if any. Days walked
/// before any carry exists produce no output.
pub fn fill_forward(
    pair: &CurrencyPair,
    start: NaiveDate,
    end: NaiveDate,
    rows: &[RatePoint],
    seed: Option<RatePoint>,
) -> Vec<DenseRatePoint> {
    let mut carry = seed;
    let mut pending = rows.iter().peekable();
    let mut points = Vec::with_capacity(ratesync_common::days_inclusive(start, end));

    for day in DateRange::inclusive(start, end) {
        while let Some(point) = pending.next_if(|p| p.date <= day) {
            carry = Some(point.clone());
        }

        if let Some(carry) = &carry {
            points.push(DenseRatePoint {
                date: day,
                rate: carry.rate,
                published_date: carry.date,
                base: pair.base.clone(),
                target: pair.target.clone(),
            });
        }
    }

    points
}
