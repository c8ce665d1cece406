//! RateSync Store
//!
//! SQLite persistence for rate points, the series registry, and the series
//! event outbox. Writers take explicit connections so the caller owns the
//! transaction boundary.

pub mod db;
pub mod rates;
pub mod series;
pub mod outbox;

pub use db::{Database, DatabaseConfig, WriteTransaction};
pub use rates::RateStore;
pub use series::SeriesRegistry;
pub use outbox::SeriesEventStore;

pub use sqlx::{Sqlite, SqliteConnection, Transaction};
