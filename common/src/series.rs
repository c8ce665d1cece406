//! Series, rate point, and import result types.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::currency::{Currency, CurrencyPair};
use crate::identifiers::{EventId, RatePointId, SeriesId};

/// A configured series tracked by the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    /// Series identity.
    pub id: SeriesId,
    /// Target currency code; immutable once created.
    pub currency: Currency,
    /// Identifier of the series at the upstream provider.
    pub provider_series_id: String,
    /// Whether imports run for this series.
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Series {
    /// The stored pair for this series against the given base currency.
    pub fn pair(&self, base: &Currency) -> CurrencyPair {
        CurrencyPair::new(base.clone(), self.currency.clone())
    }
}

/// Input for registering a new series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSeries {
    pub currency: Currency,
    pub provider_series_id: String,
    pub enabled: bool,
}

impl NewSeries {
    /// Create an enabled series definition.
    pub fn new(currency: Currency, provider_series_id: impl Into<String>) -> Self {
        Self {
            currency,
            provider_series_id: provider_series_id.into(),
            enabled: true,
        }
    }

    /// Mark the series as disabled at creation.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A stored daily rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePoint {
    pub id: RatePointId,
    /// Owning series.
    pub series_id: SeriesId,
    /// Base currency, denormalized next to the series reference.
    pub base: Currency,
    /// Target currency, denormalized next to the series reference.
    pub target: Currency,
    pub date: NaiveDate,
    /// Rate value; absent when the provider published the date without a value.
    pub rate: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-series statistics of one import call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub currency: Currency,
    pub provider_series_id: String,
    pub new_count: u64,
    pub updated_count: u64,
    pub skipped_count: u64,
    /// Earliest observation date in this call's batch.
    pub earliest: Option<NaiveDate>,
    /// Latest observation date in this call's batch.
    pub latest: Option<NaiveDate>,
    pub imported_at: DateTime<Utc>,
}

impl ImportResult {
    /// Zero-count result for a series.
    pub fn empty(series: &Series) -> Self {
        Self {
            currency: series.currency.clone(),
            provider_series_id: series.provider_series_id.clone(),
            new_count: 0,
            updated_count: 0,
            skipped_count: 0,
            earliest: None,
            latest: None,
            imported_at: Utc::now(),
        }
    }

    /// Widen the earliest/latest window to include a date.
    pub fn touch(&mut self, date: NaiveDate) {
        self.earliest = Some(self.earliest.map_or(date, |d| d.min(date)));
        self.latest = Some(self.latest.map_or(date, |d| d.max(date)));
    }

    /// Number of rows written (inserted or updated).
    pub fn written(&self) -> u64 {
        self.new_count + self.updated_count
    }

    /// Total observations seen.
    pub fn total(&self) -> u64 {
        self.new_count + self.updated_count + self.skipped_count
    }
}

impl fmt::Display for ImportResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): new={} updated={} skipped={}",
            self.currency,
            self.provider_series_id,
            self.new_count,
            self.updated_count,
            self.skipped_count
        )
    }
}

/// One day of a dense range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseRatePoint {
    /// The calendar day this point stands for.
    pub date: NaiveDate,
    pub rate: Option<Decimal>,
    /// The date the rate was actually published on; earlier than `date` on
    /// forward-filled days.
    pub published_date: NaiveDate,
    pub base: Currency,
    pub target: Currency,
}

impl DenseRatePoint {
    /// Whether the rate was carried forward from an earlier day.
    pub fn is_filled(&self) -> bool {
        self.published_date != self.date
    }
}

/// Kind of a recorded series event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesEventKind {
    /// A series row was created.
    Created,
}

impl SeriesEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesEventKind::Created => "series_created",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "series_created" => Some(SeriesEventKind::Created),
            _ => None,
        }
    }
}

impl fmt::Display for SeriesEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable fact recorded alongside a series change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesEvent {
    pub id: EventId,
    pub series_id: SeriesId,
    pub kind: SeriesEventKind,
    pub created_at: DateTime<Utc>,
    /// Completion marker; `None` while the event is pending.
    pub processed_at: Option<DateTime<Utc>>,
    /// Number of failed processing attempts.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl SeriesEvent {
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }
}
