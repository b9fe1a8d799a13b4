use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::availability;
use crate::models::{Listing, Reservation, ReservationStatus};
use crate::range::DateRange;
use crate::repository::ReservationRepository;
use crate::search::{ListingSearch, SearchPage};
use crate::{CoreError, CoreResult};

#[derive(Default)]
struct MemoryState {
    listings: Vec<Listing>,
    reservations: Vec<Reservation>,
}

/// In-memory repository for tests and local runs without Postgres.
///
/// A single async mutex guards all state; `insert_guarded` holds it across
/// the re-check and the push, which gives the same per-listing atomicity the
/// Postgres repository gets from its row lock.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_listing(&self, listing: Listing) {
        self.state.lock().await.listings.push(listing);
    }

    /// Loads a reservation as-is, skipping the overlap guard. Fixture loading only.
    pub async fn seed_reservation(&self, reservation: Reservation) {
        self.state.lock().await.reservations.push(reservation);
    }

    pub async fn all_reservations(&self) -> Vec<Reservation> {
        self.state.lock().await.reservations.clone()
    }
}

#[async_trait]
impl ReservationRepository for InMemoryRepository {
    async fn get_listing(&self, id: Uuid) -> CoreResult<Option<Listing>> {
        let state = self.state.lock().await;
        Ok(state.listings.iter().find(|l| l.id == id).cloned())
    }

    async fn get_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state.reservations.iter().find(|r| r.id == id).cloned())
    }

    async fn active_overlapping(&self, listing_id: Uuid, range: &DateRange) -> CoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .iter()
            .filter(|r| r.listing_id == listing_id && r.is_active() && r.range().overlaps(range))
            .cloned()
            .collect())
    }

    async fn reservations_for_listing(&self, listing_id: Uuid) -> CoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut found: Vec<Reservation> = state
            .reservations
            .iter()
            .filter(|r| r.listing_id == listing_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.check_in_date);
        Ok(found)
    }

    async fn reservations_for_guest(&self, guest_id: Uuid) -> CoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut found: Vec<Reservation> = state
            .reservations
            .iter()
            .filter(|r| r.guest_id == guest_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.check_in_date);
        Ok(found)
    }

    async fn listings_with_conflicts(&self, listing_ids: &[Uuid], range: &DateRange) -> CoreResult<HashSet<Uuid>> {
        let wanted: HashSet<&Uuid> = listing_ids.iter().collect();
        let state = self.state.lock().await;
        Ok(availability::conflicting_listings(
            state.reservations.iter().filter(|r| wanted.contains(&r.listing_id)),
            range,
        ))
    }

    async fn search_listings(&self, query: &ListingSearch) -> CoreResult<SearchPage> {
        let state = self.state.lock().await;
        let blocked = match &query.range {
            Some(range) => availability::conflicting_listings(&state.reservations, range),
            None => HashSet::new(),
        };

        let mut hits: Vec<&Listing> = state
            .listings
            .iter()
            .filter(|l| query.matches(l) && !blocked.contains(&l.id))
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = hits.len() as i64;
        let listings = hits
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .cloned()
            .collect();
        Ok(SearchPage { listings, total })
    }

    async fn insert_guarded(&self, reservation: &Reservation) -> CoreResult<()> {
        let mut state = self.state.lock().await;

        if !state.listings.iter().any(|l| l.id == reservation.listing_id) {
            return Err(CoreError::NotFound(format!("listing {}", reservation.listing_id)));
        }
        if state
            .reservations
            .iter()
            .any(|r| r.confirmation_code == reservation.confirmation_code)
        {
            return Err(CoreError::DuplicateCode);
        }

        let range = reservation.range();
        let same_listing: Vec<Reservation> = state
            .reservations
            .iter()
            .filter(|r| r.listing_id == reservation.listing_id)
            .cloned()
            .collect();
        if let Some(existing) = availability::find_conflict(&same_listing, &range) {
            return Err(CoreError::Conflict {
                listing_id: reservation.listing_id,
                conflicting: Some(existing.id),
            });
        }

        state.reservations.push(reservation.clone());
        Ok(())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.reservations.iter_mut().find(|r| r.id == id && r.status == from) {
            Some(r) => {
                r.status = to;
                r.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_elapsed(&self, today: NaiveDate, at: DateTime<Utc>) -> CoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for r in state
            .reservations
            .iter_mut()
            .filter(|r| r.is_active() && r.check_out_date <= today)
        {
            r.status = ReservationStatus::Completed;
            r.updated_at = at;
            count += 1;
        }
        Ok(count)
    }

    async fn expire_pending_before(&self, cutoff: DateTime<Utc>, at: DateTime<Utc>) -> CoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for r in state
            .reservations
            .iter_mut()
            .filter(|r| r.status == ReservationStatus::Pending && r.created_at < cutoff)
        {
            r.status = ReservationStatus::Cancelled;
            r.updated_at = at;
            count += 1;
        }
        Ok(count)
    }

    async fn mark_guest_reviewed(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.reservations.iter_mut().find(|r| {
            r.id == id && r.status == ReservationStatus::Completed && !r.guest_reviewed_host
        }) {
            Some(r) => {
                r.guest_reviewed_host = true;
                r.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
