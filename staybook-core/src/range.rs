use chrono::NaiveDate;
use serde::Serialize;

use crate::{CoreError, CoreResult};

/// Half-open stay `[from, to)`: `from` is the check-in day, `to` the checkout day.
///
/// A checkout on day X and a check-in on day X never overlap, so back-to-back
/// stays are legal. Construction through [`DateRange::new`] guarantees at least
/// one night. Outside this crate that is the only way to build one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    pub(crate) from: NaiveDate,
    pub(crate) to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> CoreResult<Self> {
        if from >= to {
            return Err(CoreError::InvalidRange(format!(
                "check-out {} must be after check-in {}",
                to, from
            )));
        }
        Ok(Self { from, to })
    }

    /// Parses ISO `YYYY-MM-DD` bounds, as received from query strings.
    pub fn parse(from: &str, to: &str) -> CoreResult<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| CoreError::InvalidRange(format!("not a date: {:?}", s)))
        };
        Self::new(parse(from)?, parse(to)?)
    }

    /// Check-in day.
    pub fn from(&self) -> NaiveDate {
        self.from
    }

    /// Checkout day, not a night of the stay.
    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn nights(&self) -> i64 {
        (self.to - self.from).num_days()
    }

    /// The one overlap test. Every availability decision goes through here,
    /// and the SQL fragment in the store mirrors it.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.from < other.to && other.from < self.to
    }

    pub fn ensure_not_past(&self, today: NaiveDate) -> CoreResult<()> {
        if self.from < today {
            return Err(CoreError::InvalidRange(format!(
                "check-in {} is in the past",
                self.from
            )));
        }
        Ok(())
    }

    /// Every night of the stay, i.e. each day in `[from, to)`.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let to = self.to;
        self.from.iter_days().take_while(move |d| *d < to)
    }
}
