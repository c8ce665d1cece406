//! RateSync Common Types
//!
//! This crate contains shared types used across RateSync, including
//! identifiers, currency codes, series and rate point records, and the
//! error taxonomy.

pub mod identifiers;
pub mod currency;
pub mod series;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use currency::*;
pub use series::*;
pub use error::*;
pub use time::*;
