use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{Listing, Reservation, ReservationStatus};
use crate::range::DateRange;
use crate::search::{ListingSearch, SearchPage};
use crate::CoreResult;

/// Repository trait for listing and reservation data access.
///
/// `insert_guarded` is the only way a reservation is created. Implementations
/// must run the overlap re-check (`availability::find_conflict`) and the
/// insert as one atomic unit, returning `CoreError::Conflict` without writing
/// anything when the dates are taken.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn get_listing(&self, id: Uuid) -> CoreResult<Option<Listing>>;

    async fn get_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>>;

    /// Active reservations on `listing_id` overlapping `range`.
    async fn active_overlapping(&self, listing_id: Uuid, range: &DateRange) -> CoreResult<Vec<Reservation>>;

    /// All reservations on a listing, any status.
    async fn reservations_for_listing(&self, listing_id: Uuid) -> CoreResult<Vec<Reservation>>;

    async fn reservations_for_guest(&self, guest_id: Uuid) -> CoreResult<Vec<Reservation>>;

    /// Which of `listing_ids` have an active reservation overlapping `range`.
    /// One set-based lookup, not one per listing.
    async fn listings_with_conflicts(&self, listing_ids: &[Uuid], range: &DateRange) -> CoreResult<HashSet<Uuid>>;

    async fn search_listings(&self, query: &ListingSearch) -> CoreResult<SearchPage>;

    async fn insert_guarded(&self, reservation: &Reservation) -> CoreResult<()>;

    /// Compare-and-set on status. Returns `false` when the row is no longer in `from`.
    async fn transition_status(
        &self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<bool>;

    /// Active reservations whose checkout is on or before `today` become completed.
    async fn complete_elapsed(&self, today: NaiveDate, at: DateTime<Utc>) -> CoreResult<u64>;

    /// Pending reservations created before `cutoff` become cancelled.
    async fn expire_pending_before(&self, cutoff: DateTime<Utc>, at: DateTime<Utc>) -> CoreResult<u64>;

    /// Sets `guest_reviewed_host` on a completed reservation. Returns `false`
    /// when it was already set.
    async fn mark_guest_reviewed(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<bool>;
}
