use std::collections::HashSet;
use uuid::Uuid;

use crate::models::Reservation;
use crate::range::DateRange;

/// First active reservation whose stay overlaps `range`.
///
/// Shared by the read-only availability check and by every repository's
/// guarded insert, so both paths agree on what a conflict is.
pub fn find_conflict<'a>(reservations: &'a [Reservation], range: &DateRange) -> Option<&'a Reservation> {
    reservations
        .iter()
        .filter(|r| r.is_active())
        .find(|r| r.range().overlaps(range))
}

/// Listings that have at least one active reservation overlapping `range`.
pub fn conflicting_listings<'a, I>(reservations: I, range: &DateRange) -> HashSet<Uuid>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    reservations
        .into_iter()
        .filter(|r| r.is_active() && r.range().overlaps(range))
        .map(|r| r.listing_id)
        .collect()
}

/// Returns a pair of active reservations on the same listing whose stays
/// overlap, if any. A healthy reservation set always returns `None`.
pub fn find_overlapping_pair(reservations: &[Reservation]) -> Option<(&Reservation, &Reservation)> {
    let mut active: Vec<&Reservation> = reservations.iter().filter(|r| r.is_active()).collect();
    active.sort_by_key(|r| (r.listing_id, r.check_in_date));
    active
        .windows(2)
        .find(|w| w[0].listing_id == w[1].listing_id && w[0].range().overlaps(&w[1].range()))
        .map(|w| (w[0], w[1]))
}
