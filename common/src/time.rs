//! Calendar day utilities.

use chrono::NaiveDate;

/// The calendar day after `date`, or `None` at the end of the representable range.
pub fn next_day(date: NaiveDate) -> Option<NaiveDate> {
    date.succ_opt()
}

/// Number of calendar days in `[start, end]`; zero when `start > end`.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> usize {
    if start > end {
        return 0;
    }
    (end - start).num_days() as usize + 1
}

/// Inclusive iterator over calendar days.
#[derive(Debug, Clone)]
pub struct DateRange {
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl DateRange {
    /// Every day from `start` to `end`, both included. Empty when `start > end`.
    pub fn inclusive(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            next: (start <= end).then_some(start),
            end,
        }
    }
}

impl Iterator for DateRange {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next?;
        self.next = next_day(current).filter(|d| *d <= self.end);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.next.map_or(0, |d| days_inclusive(d, self.end));
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DateRange {}
