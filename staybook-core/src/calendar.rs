use chrono::NaiveDate;
use serde::Serialize;

use crate::models::Reservation;
use crate::range::DateRange;

/// Disabled days for a listing's date picker.
///
/// A day is disabled when it is before `today` or falls inside
/// `[check_in, check_out]` of an active reservation. The checkout day is
/// included on purpose: the picker should not offer a one-day gap that the
/// booking path would accept only as a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisabledDates {
    today: NaiveDate,
    /// Inclusive spans, sorted by start and merged.
    spans: Vec<(NaiveDate, NaiveDate)>,
}

impl DisabledDates {
    pub fn is_disabled(&self, date: NaiveDate) -> bool {
        if date < self.today {
            return true;
        }
        // Spans starting after `date` cannot contain it.
        let bound = self.spans.partition_point(|(start, _)| *start <= date);
        self.spans[..bound].last().is_some_and(|(_, end)| date <= *end)
    }

    /// The disabled days inside `window`, in order.
    pub fn dates_between(&self, window: &DateRange) -> Vec<NaiveDate> {
        window.days().filter(|d| self.is_disabled(*d)).collect()
    }

    pub fn spans(&self) -> &[(NaiveDate, NaiveDate)] {
        &self.spans
    }
}

pub fn disabled_dates(reservations: &[Reservation], today: NaiveDate) -> DisabledDates {
    let mut spans: Vec<(NaiveDate, NaiveDate)> = reservations
        .iter()
        .filter(|r| r.is_active())
        .map(|r| (r.check_in_date, r.check_out_date))
        .collect();
    spans.sort();

    let mut merged: Vec<(NaiveDate, NaiveDate)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                if end > *last_end {
                    *last_end = end;
                }
            }
            _ => merged.push((start, end)),
        }
    }

    DisabledDates { today, spans: merged }
}
