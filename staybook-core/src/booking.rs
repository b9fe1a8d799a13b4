use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use staybook_shared::{Masked, ReservationCreatedEvent, ReservationStatusChangedEvent};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::availability;
use crate::calendar::{self, DisabledDates};
use crate::confirmation;
use crate::events::ReservationEvents;
use crate::models::{Listing, Reservation, ReservationStatus};
use crate::pricing::{self, Quote};
use crate::range::DateRange;
use crate::repository::ReservationRepository;
use crate::search::{ListingSearch, SearchPage, Trips};
use crate::{CoreError, CoreResult};

const CODE_ATTEMPTS: u32 = 3;

/// Booking policy, loaded from the `booking` config section.
#[derive(Debug, Deserialize, Clone)]
pub struct BookingRules {
    /// Status given to new reservations: `pending` waits for the host.
    #[serde(default = "default_initial_status")]
    pub initial_status: ReservationStatus,
    #[serde(default = "default_max_nights")]
    pub max_nights: u32,
    /// Pending reservations older than this are cancelled by the lifecycle worker.
    #[serde(default = "default_host_confirmation_hours")]
    pub host_confirmation_hours: u32,
}

fn default_initial_status() -> ReservationStatus {
    ReservationStatus::Pending
}

fn default_max_nights() -> u32 {
    365
}

fn default_host_confirmation_hours() -> u32 {
    24
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            initial_status: default_initial_status(),
            max_nights: default_max_nights(),
            host_confirmation_hours: default_host_confirmation_hours(),
        }
    }
}

/// Availability, pricing and the guarded reservation write.
///
/// Every decision depends only on the explicit arguments (listing, guest,
/// range and the caller's `today`), never on ambient state.
#[derive(Clone)]
pub struct BookingService {
    repo: Arc<dyn ReservationRepository>,
    events: Arc<dyn ReservationEvents>,
    rules: BookingRules,
}

impl BookingService {
    pub fn new(repo: Arc<dyn ReservationRepository>, events: Arc<dyn ReservationEvents>, rules: BookingRules) -> Self {
        Self { repo, events, rules }
    }

    /// True when no active reservation overlaps `range`. Pure read.
    pub async fn is_available(&self, listing_id: Uuid, range: &DateRange, today: NaiveDate) -> CoreResult<bool> {
        range.ensure_not_past(today)?;
        self.bookable_listing(listing_id).await?;
        let existing = self.repo.active_overlapping(listing_id, range).await?;
        Ok(availability::find_conflict(&existing, range).is_none())
    }

    pub async fn quote(&self, listing_id: Uuid, range: &DateRange) -> CoreResult<Quote> {
        let listing = self.bookable_listing(listing_id).await?;
        self.check_stay_length(range)?;
        pricing::quote(&listing, range)
    }

    /// Creates a reservation if the dates are still free.
    ///
    /// The repository re-checks overlap inside the same transaction as the
    /// insert, so an earlier `is_available` answer is never trusted here.
    /// A `Conflict` means the guest has to pick other dates; it is not retried.
    pub async fn create_reservation(
        &self,
        listing_id: Uuid,
        guest_id: Uuid,
        range: &DateRange,
        today: NaiveDate,
    ) -> CoreResult<Reservation> {
        range.ensure_not_past(today)?;
        self.check_stay_length(range)?;

        let listing = self.bookable_listing(listing_id).await?;

        if listing.host_id == guest_id {
            return Err(CoreError::Forbidden("hosts cannot book their own listing".to_string()));
        }

        let quote = pricing::quote(&listing, range)?;

        let mut attempt = 0;
        let reservation = loop {
            attempt += 1;
            let candidate = Reservation::new(
                listing_id,
                guest_id,
                range,
                &quote,
                self.rules.initial_status,
                confirmation::generate(),
            );
            match self.repo.insert_guarded(&candidate).await {
                Ok(()) => break candidate,
                Err(CoreError::DuplicateCode) if attempt < CODE_ATTEMPTS => {
                    warn!("Confirmation code collision on attempt {}, regenerating", attempt);
                }
                Err(CoreError::Conflict { listing_id, conflicting }) => {
                    info!(
                        "Booking rejected for listing {} [{}, {}): overlaps {:?}",
                        listing_id, range.from, range.to, conflicting
                    );
                    return Err(CoreError::Conflict { listing_id, conflicting });
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            "Reservation {} created on listing {} [{}, {}) status {}",
            reservation.id, listing_id, range.from, range.to, reservation.status
        );

        let event = ReservationCreatedEvent {
            reservation_id: reservation.id,
            listing_id,
            guest_id,
            host_id: listing.host_id,
            check_in_date: reservation.check_in_date,
            check_out_date: reservation.check_out_date,
            nights: reservation.nights,
            total_price: reservation.total_price,
            status: reservation.status.to_string(),
            confirmation_code: Masked(reservation.confirmation_code.clone()),
            timestamp: reservation.created_at.timestamp(),
        };
        if let Err(e) = self.events.reservation_created(&event).await {
            warn!("Failed to publish reservation.created for {}: {}", reservation.id, e);
        }

        Ok(reservation)
    }

    /// Order-preserving subset of `listings` with no active reservation
    /// overlapping `range`. One repository round-trip for the whole batch.
    pub async fn filter_available(&self, listings: Vec<Listing>, range: &DateRange) -> CoreResult<Vec<Listing>> {
        if listings.is_empty() {
            return Ok(listings);
        }
        let ids: Vec<Uuid> = listings.iter().map(|l| l.id).collect();
        let blocked = self.repo.listings_with_conflicts(&ids, range).await?;
        Ok(listings.into_iter().filter(|l| !blocked.contains(&l.id)).collect())
    }

    pub async fn search(&self, query: &ListingSearch) -> CoreResult<SearchPage> {
        self.repo.search_listings(query).await
    }

    pub async fn calendar(&self, listing_id: Uuid, today: NaiveDate) -> CoreResult<DisabledDates> {
        self.bookable_listing(listing_id).await?;
        let reservations = self.repo.reservations_for_listing(listing_id).await?;
        Ok(calendar::disabled_dates(&reservations, today))
    }

    /// A reservation as seen by its guest or by the listing's host.
    pub async fn get_reservation(&self, id: Uuid, actor: Uuid) -> CoreResult<Reservation> {
        let (reservation, listing) = self.load_with_listing(id).await?;
        if actor != reservation.guest_id && actor != listing.host_id {
            return Err(CoreError::Forbidden(format!("reservation {}", id)));
        }
        Ok(reservation)
    }

    pub async fn trips(&self, guest_id: Uuid, today: NaiveDate) -> CoreResult<Trips> {
        let reservations = self.repo.reservations_for_guest(guest_id).await?;
        let (mut upcoming, mut past): (Vec<_>, Vec<_>) =
            reservations.into_iter().partition(|r| r.check_in_date > today);
        upcoming.sort_by_key(|r| r.check_in_date);
        past.sort_by(|a, b| b.check_in_date.cmp(&a.check_in_date));
        Ok(Trips { upcoming, past })
    }

    /// Host accepts a pending reservation.
    pub async fn confirm_reservation(&self, id: Uuid, actor: Uuid) -> CoreResult<Reservation> {
        let (reservation, listing) = self.load_with_listing(id).await?;
        if actor != listing.host_id {
            return Err(CoreError::Forbidden("only the host can confirm".to_string()));
        }
        self.transition(reservation, ReservationStatus::Confirmed).await
    }

    /// Guest or host cancels; the dates become bookable again.
    pub async fn cancel_reservation(&self, id: Uuid, actor: Uuid) -> CoreResult<Reservation> {
        let (reservation, listing) = self.load_with_listing(id).await?;
        if actor != reservation.guest_id && actor != listing.host_id {
            return Err(CoreError::Forbidden("only the guest or host can cancel".to_string()));
        }
        self.transition(reservation, ReservationStatus::Cancelled).await
    }

    pub async fn complete_elapsed(&self, today: NaiveDate) -> CoreResult<u64> {
        let count = self.repo.complete_elapsed(today, Utc::now()).await?;
        if count > 0 {
            info!("Completed {} reservations with checkout on or before {}", count, today);
        }
        Ok(count)
    }

    /// Cancels pending reservations the host never confirmed in time.
    /// A no-op when reservations are confirmed on creation.
    pub async fn expire_unconfirmed(&self, now: chrono::DateTime<Utc>) -> CoreResult<u64> {
        if self.rules.initial_status != ReservationStatus::Pending {
            return Ok(0);
        }
        let cutoff = now - Duration::hours(i64::from(self.rules.host_confirmation_hours));
        let count = self.repo.expire_pending_before(cutoff, now).await?;
        if count > 0 {
            info!("Expired {} pending reservations created before {}", count, cutoff);
        }
        Ok(count)
    }

    /// Checks that `user_id` may review the stay behind `reservation_id`.
    pub async fn review_eligibility(&self, reservation_id: Uuid, user_id: Uuid) -> CoreResult<Reservation> {
        let reservation = self
            .repo
            .get_reservation(reservation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("reservation {}", reservation_id)))?;

        if reservation.guest_id != user_id {
            return Err(CoreError::Forbidden("only the guest can review a stay".to_string()));
        }
        if reservation.status != ReservationStatus::Completed {
            return Err(CoreError::NotCompleted(reservation_id));
        }
        if reservation.guest_reviewed_host {
            return Err(CoreError::AlreadyReviewed(reservation_id));
        }
        Ok(reservation)
    }

    /// Records that the guest reviewed the stay. Called by the review subsystem
    /// in the same flow that stores the review.
    pub async fn mark_guest_reviewed(&self, reservation_id: Uuid, user_id: Uuid) -> CoreResult<()> {
        self.review_eligibility(reservation_id, user_id).await?;
        if !self.repo.mark_guest_reviewed(reservation_id, Utc::now()).await? {
            return Err(CoreError::AlreadyReviewed(reservation_id));
        }
        Ok(())
    }

    fn check_stay_length(&self, range: &DateRange) -> CoreResult<()> {
        if range.nights() > i64::from(self.rules.max_nights) {
            return Err(CoreError::InvalidRange(format!(
                "stays are limited to {} nights",
                self.rules.max_nights
            )));
        }
        Ok(())
    }

    /// Listings that are unpublished or unlisted look the same as missing ones
    /// to every guest-facing read and to booking.
    async fn bookable_listing(&self, listing_id: Uuid) -> CoreResult<Listing> {
        self.repo
            .get_listing(listing_id)
            .await?
            .filter(Listing::is_bookable)
            .ok_or_else(|| CoreError::NotFound(format!("listing {}", listing_id)))
    }

    /// Existing reservations stay reachable after their listing is hidden.
    async fn listing(&self, listing_id: Uuid) -> CoreResult<Listing> {
        self.repo
            .get_listing(listing_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("listing {}", listing_id)))
    }

    async fn load_with_listing(&self, id: Uuid) -> CoreResult<(Reservation, Listing)> {
        let reservation = self
            .repo
            .get_reservation(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("reservation {}", id)))?;
        let listing = self.listing(reservation.listing_id).await?;
        Ok((reservation, listing))
    }

    async fn transition(&self, mut reservation: Reservation, to: ReservationStatus) -> CoreResult<Reservation> {
        let from = reservation.status;
        if !from.can_transition_to(to) {
            return Err(CoreError::InvalidTransition { from, to });
        }

        let now = Utc::now();
        if !self.repo.transition_status(reservation.id, from, to, now).await? {
            // Someone else moved it first
            let current = self
                .repo
                .get_reservation(reservation.id)
                .await?
                .map(|r| r.status)
                .unwrap_or(from);
            return Err(CoreError::InvalidTransition { from: current, to });
        }

        reservation.status = to;
        reservation.updated_at = now;
        info!("Reservation {} moved {} -> {}", reservation.id, from, to);

        let event = ReservationStatusChangedEvent {
            reservation_id: reservation.id,
            listing_id: reservation.listing_id,
            from: from.to_string(),
            to: to.to_string(),
            timestamp: now.timestamp(),
        };
        if let Err(e) = self.events.status_changed(&event).await {
            warn!("Failed to publish status change for {}: {}", reservation.id, e);
        }

        Ok(reservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEvents;
    use crate::memory::InMemoryRepository;
    use crate::repository::ReservationRepository;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn range(from: NaiveDate, to: NaiveDate) -> DateRange {
        DateRange::new(from, to).unwrap()
    }

    fn listing(host_id: Uuid, price: i64) -> Listing {
        Listing {
            id: Uuid::new_v4(),
            host_id,
            title: "Harbour apartment".to_string(),
            city: Some("Oslo".to_string()),
            state: None,
            country: Some("Norway".to_string()),
            price,
            weekend_price: None,
            guest_count: 4,
            bedroom_count: 2,
            bed_count: 2,
            bathroom_count: 1,
            category_id: None,
            privacy_type_id: None,
            amenity_ids: Vec::new(),
            host_type: None,
            is_published: true,
            is_listed: true,
            created_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct RecordingEvents {
        created: Mutex<Vec<ReservationCreatedEvent>>,
        changed: Mutex<Vec<ReservationStatusChangedEvent>>,
    }

    #[async_trait]
    impl ReservationEvents for RecordingEvents {
        async fn reservation_created(
            &self,
            event: &ReservationCreatedEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.created.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn status_changed(
            &self,
            event: &ReservationStatusChangedEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.changed.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// Reports a confirmation code collision for the first `collisions` inserts.
    struct CollidingCodes {
        inner: InMemoryRepository,
        collisions: AtomicU32,
        attempts: AtomicU32,
    }

    impl CollidingCodes {
        fn new(collisions: u32) -> Self {
            Self {
                inner: InMemoryRepository::new(),
                collisions: AtomicU32::new(collisions),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ReservationRepository for CollidingCodes {
        async fn get_listing(&self, id: Uuid) -> CoreResult<Option<Listing>> {
            self.inner.get_listing(id).await
        }

        async fn get_reservation(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
            self.inner.get_reservation(id).await
        }

        async fn active_overlapping(&self, listing_id: Uuid, range: &DateRange) -> CoreResult<Vec<Reservation>> {
            self.inner.active_overlapping(listing_id, range).await
        }

        async fn reservations_for_listing(&self, listing_id: Uuid) -> CoreResult<Vec<Reservation>> {
            self.inner.reservations_for_listing(listing_id).await
        }

        async fn reservations_for_guest(&self, guest_id: Uuid) -> CoreResult<Vec<Reservation>> {
            self.inner.reservations_for_guest(guest_id).await
        }

        async fn listings_with_conflicts(&self, ids: &[Uuid], range: &DateRange) -> CoreResult<HashSet<Uuid>> {
            self.inner.listings_with_conflicts(ids, range).await
        }

        async fn search_listings(&self, query: &ListingSearch) -> CoreResult<SearchPage> {
            self.inner.search_listings(query).await
        }

        async fn insert_guarded(&self, reservation: &Reservation) -> CoreResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.collisions.load(Ordering::SeqCst);
            if remaining > 0 {
                self.collisions.store(remaining - 1, Ordering::SeqCst);
                return Err(CoreError::DuplicateCode);
            }
            self.inner.insert_guarded(reservation).await
        }

        async fn transition_status(
            &self,
            id: Uuid,
            from: ReservationStatus,
            to: ReservationStatus,
            at: DateTime<Utc>,
        ) -> CoreResult<bool> {
            self.inner.transition_status(id, from, to, at).await
        }

        async fn complete_elapsed(&self, today: NaiveDate, at: DateTime<Utc>) -> CoreResult<u64> {
            self.inner.complete_elapsed(today, at).await
        }

        async fn expire_pending_before(&self, cutoff: DateTime<Utc>, at: DateTime<Utc>) -> CoreResult<u64> {
            self.inner.expire_pending_before(cutoff, at).await
        }

        async fn mark_guest_reviewed(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<bool> {
            self.inner.mark_guest_reviewed(id, at).await
        }
    }

    async fn colliding_service(collisions: u32) -> (Arc<CollidingCodes>, BookingService, Listing) {
        let repo = Arc::new(CollidingCodes::new(collisions));
        let listing = listing(Uuid::new_v4(), 100);
        repo.inner.add_listing(listing.clone()).await;
        let service = BookingService::new(repo.clone(), Arc::new(NoopEvents), BookingRules::default());
        (repo, service, listing)
    }

    #[tokio::test]
    async fn code_collisions_are_regenerated() {
        let (repo, service, listing) = colliding_service(CODE_ATTEMPTS - 1).await;
        let created = service
            .create_reservation(listing.id, Uuid::new_v4(), &range(d(2024, 7, 1), d(2024, 7, 3)), d(2024, 6, 1))
            .await
            .unwrap();
        assert_eq!(repo.attempts.load(Ordering::SeqCst), CODE_ATTEMPTS);
        assert!(created.confirmation_code.starts_with("HM"));
        assert_eq!(repo.inner.all_reservations().await.len(), 1);
    }

    #[tokio::test]
    async fn code_collisions_give_up_after_the_last_attempt() {
        let (repo, service, listing) = colliding_service(CODE_ATTEMPTS).await;
        let result = service
            .create_reservation(listing.id, Uuid::new_v4(), &range(d(2024, 7, 1), d(2024, 7, 3)), d(2024, 6, 1))
            .await;
        assert!(matches!(result, Err(CoreError::DuplicateCode)));
        assert_eq!(repo.attempts.load(Ordering::SeqCst), CODE_ATTEMPTS);
        assert!(repo.inner.all_reservations().await.is_empty());
    }

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        service: BookingService,
        host: Uuid,
        listing: Listing,
    }

    async fn fixture_with(rules: BookingRules, events: Arc<dyn ReservationEvents>) -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let host = Uuid::new_v4();
        let listing = listing(host, 100);
        repo.add_listing(listing.clone()).await;
        let service = BookingService::new(repo.clone(), events, rules);
        Fixture {
            repo,
            service,
            host,
            listing,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(BookingRules::default(), Arc::new(NoopEvents)).await
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        let f = fixture().await;
        let today = d(2024, 6, 1);

        let first = f
            .service
            .create_reservation(f.listing.id, Uuid::new_v4(), &range(d(2024, 7, 10), d(2024, 7, 15)), today)
            .await
            .unwrap();
        f.service.confirm_reservation(first.id, f.host).await.unwrap();

        // Back-to-back is fine
        let second = f
            .service
            .create_reservation(f.listing.id, Uuid::new_v4(), &range(d(2024, 7, 15), d(2024, 7, 18)), today)
            .await;
        assert!(second.is_ok());

        let overlapping = f
            .service
            .create_reservation(f.listing.id, Uuid::new_v4(), &range(d(2024, 7, 12), d(2024, 7, 20)), today)
            .await;
        match overlapping {
            Err(CoreError::Conflict { listing_id, conflicting }) => {
                assert_eq!(listing_id, f.listing.id);
                assert!(conflicting.is_some());
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        // Zero-night stay never becomes a range
        assert!(matches!(
            DateRange::new(d(2024, 6, 1), d(2024, 6, 1)),
            Err(CoreError::InvalidRange(_))
        ));

        let all = f.repo.all_reservations().await;
        assert_eq!(all.len(), 2);
        assert!(availability::find_overlapping_pair(&all).is_none());
    }

    #[tokio::test]
    async fn created_reservation_is_priced_and_pending() {
        let f = fixture().await;
        let guest = Uuid::new_v4();
        let r = f
            .service
            .create_reservation(f.listing.id, guest, &range(d(2024, 6, 1), d(2024, 6, 4)), d(2024, 6, 1))
            .await
            .unwrap();
        assert_eq!(r.nights, 3);
        assert_eq!(r.total_price, 300);
        assert_eq!(r.price_per_night, 100);
        assert_eq!(r.status, ReservationStatus::Pending);
        assert_eq!(r.guest_id, guest);
        assert!(r.confirmation_code.starts_with("HM"));
        assert!(!r.guest_reviewed_host);
    }

    #[tokio::test]
    async fn confirmed_on_creation_when_configured() {
        let rules = BookingRules {
            initial_status: ReservationStatus::Confirmed,
            ..Default::default()
        };
        let f = fixture_with(rules, Arc::new(NoopEvents)).await;
        let r = f
            .service
            .create_reservation(f.listing.id, Uuid::new_v4(), &range(d(2024, 6, 1), d(2024, 6, 4)), d(2024, 6, 1))
            .await
            .unwrap();
        assert_eq!(r.status, ReservationStatus::Confirmed);
        assert_eq!(f.service.expire_unconfirmed(Utc::now() + Duration::days(10)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn past_range_is_invalid_even_when_free() {
        let f = fixture().await;
        let today = d(2024, 6, 10);
        let past = range(d(2024, 6, 1), d(2024, 6, 4));

        assert!(matches!(
            f.service.is_available(f.listing.id, &past, today).await,
            Err(CoreError::InvalidRange(_))
        ));
        assert!(matches!(
            f.service.create_reservation(f.listing.id, Uuid::new_v4(), &past, today).await,
            Err(CoreError::InvalidRange(_))
        ));
        assert!(f.repo.all_reservations().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_listing_is_not_found() {
        let f = fixture().await;
        let r = range(d(2024, 7, 1), d(2024, 7, 3));
        assert!(matches!(
            f.service.is_available(Uuid::new_v4(), &r, d(2024, 6, 1)).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            f.service.create_reservation(Uuid::new_v4(), Uuid::new_v4(), &r, d(2024, 6, 1)).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unlisted_listing_cannot_be_booked() {
        let f = fixture().await;
        let mut hidden = listing(f.host, 80);
        hidden.is_listed = false;
        f.repo.add_listing(hidden.clone()).await;

        let result = f
            .service
            .create_reservation(hidden.id, Uuid::new_v4(), &range(d(2024, 7, 1), d(2024, 7, 3)), d(2024, 6, 1))
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn hidden_listing_is_not_found_on_every_guest_read() {
        let f = fixture().await;
        let stay = range(d(2024, 7, 1), d(2024, 7, 3));
        let today = d(2024, 6, 1);

        let guest = Uuid::new_v4();
        let mut unpublished = listing(f.host, 80);
        unpublished.is_published = false;
        f.repo.add_listing(unpublished.clone()).await;

        assert!(matches!(
            f.service.is_available(unpublished.id, &stay, today).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(f.service.quote(unpublished.id, &stay).await, Err(CoreError::NotFound(_))));
        assert!(matches!(f.service.calendar(unpublished.id, today).await, Err(CoreError::NotFound(_))));
        assert!(matches!(
            f.service.create_reservation(unpublished.id, guest, &stay, today).await,
            Err(CoreError::NotFound(_))
        ));

        // A stay booked before the listing was hidden stays reachable.
        let quote = pricing::quote(&unpublished, &stay).unwrap();
        let earlier = Reservation::new(unpublished.id, guest, &stay, &quote, ReservationStatus::Confirmed, "HMHIDDEN2".to_string());
        f.repo.seed_reservation(earlier.clone()).await;
        assert_eq!(f.service.get_reservation(earlier.id, guest).await.unwrap().id, earlier.id);
        assert_eq!(f.service.get_reservation(earlier.id, f.host).await.unwrap().id, earlier.id);
    }

    #[tokio::test]
    async fn host_cannot_book_own_listing() {
        let f = fixture().await;
        let result = f
            .service
            .create_reservation(f.listing.id, f.host, &range(d(2024, 7, 1), d(2024, 7, 3)), d(2024, 6, 1))
            .await;
        assert!(matches!(result, Err(CoreError::Forbidden(_))));
    }

    #[tokio::test]
    async fn stay_length_is_bounded() {
        let rules = BookingRules {
            max_nights: 7,
            ..Default::default()
        };
        let f = fixture_with(rules, Arc::new(NoopEvents)).await;
        let long = range(d(2024, 7, 1), d(2024, 7, 9));
        assert!(matches!(
            f.service.create_reservation(f.listing.id, Uuid::new_v4(), &long, d(2024, 6, 1)).await,
            Err(CoreError::InvalidRange(_))
        ));
        assert!(f.service.quote(f.listing.id, &range(d(2024, 7, 1), d(2024, 7, 8))).await.is_ok());
    }

    #[tokio::test]
    async fn is_available_is_idempotent() {
        let f = fixture().await;
        let today = d(2024, 6, 1);
        f.service
            .create_reservation(f.listing.id, Uuid::new_v4(), &range(d(2024, 7, 10), d(2024, 7, 15)), today)
            .await
            .unwrap();

        for candidate in [range(d(2024, 7, 12), d(2024, 7, 13)), range(d(2024, 7, 15), d(2024, 7, 16))] {
            let first = f.service.is_available(f.listing.id, &candidate, today).await.unwrap();
            let second = f.service.is_available(f.listing.id, &candidate, today).await.unwrap();
            assert_eq!(first, second);
        }
        assert!(!f
            .service
            .is_available(f.listing.id, &range(d(2024, 7, 12), d(2024, 7, 13)), today)
            .await
            .unwrap());
        assert!(f
            .service
            .is_available(f.listing.id, &range(d(2024, 7, 15), d(2024, 7, 16)), today)
            .await
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_bookings_one_wins() {
        let f = fixture().await;
        let today = d(2024, 6, 1);
        let stay = range(d(2024, 8, 1), d(2024, 8, 5));

        let a = {
            let service = f.service.clone();
            let id = f.listing.id;
            tokio::spawn(async move { service.create_reservation(id, Uuid::new_v4(), &stay, today).await })
        };
        let b = {
            let service = f.service.clone();
            let id = f.listing.id;
            tokio::spawn(async move { service.create_reservation(id, Uuid::new_v4(), &stay, today).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(CoreError::Conflict { .. })))
                .count(),
            1
        );
        assert_eq!(f.repo.all_reservations().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_overlapping_bookings_keep_invariant() {
        let f = fixture().await;
        let today = d(2024, 6, 1);

        let mut handles = Vec::new();
        for offset in 0..20i64 {
            let service = f.service.clone();
            let id = f.listing.id;
            let from = d(2024, 9, 1) + Duration::days(offset % 7);
            let stay = range(from, from + Duration::days(3));
            handles.push(tokio::spawn(async move {
                service.create_reservation(id, Uuid::new_v4(), &stay, today).await
            }));
        }

        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) | Err(CoreError::Conflict { .. }) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        let all = f.repo.all_reservations().await;
        assert!(!all.is_empty());
        assert!(availability::find_overlapping_pair(&all).is_none());
    }

    #[tokio::test]
    async fn cancellation_frees_the_dates() {
        let f = fixture().await;
        let today = d(2024, 6, 1);
        let guest = Uuid::new_v4();
        let stay = range(d(2024, 7, 10), d(2024, 7, 15));
        let r = f.service.create_reservation(f.listing.id, guest, &stay, today).await.unwrap();

        let stranger = Uuid::new_v4();
        assert!(matches!(
            f.service.cancel_reservation(r.id, stranger).await,
            Err(CoreError::Forbidden(_))
        ));

        let cancelled = f.service.cancel_reservation(r.id, guest).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert!(f.service.is_available(f.listing.id, &stay, today).await.unwrap());

        assert!(matches!(
            f.service.cancel_reservation(r.id, f.host).await,
            Err(CoreError::InvalidTransition {
                from: ReservationStatus::Cancelled,
                to: ReservationStatus::Cancelled
            })
        ));
    }

    #[tokio::test]
    async fn only_host_confirms() {
        let f = fixture().await;
        let guest = Uuid::new_v4();
        let r = f
            .service
            .create_reservation(f.listing.id, guest, &range(d(2024, 7, 1), d(2024, 7, 3)), d(2024, 6, 1))
            .await
            .unwrap();

        assert!(matches!(
            f.service.confirm_reservation(r.id, guest).await,
            Err(CoreError::Forbidden(_))
        ));
        let confirmed = f.service.confirm_reservation(r.id, f.host).await.unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);
        assert!(matches!(
            f.service.confirm_reservation(r.id, f.host).await,
            Err(CoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn completion_and_review_eligibility() {
        let f = fixture().await;
        let guest = Uuid::new_v4();
        let r = f
            .service
            .create_reservation(f.listing.id, guest, &range(d(2024, 7, 1), d(2024, 7, 3)), d(2024, 6, 1))
            .await
            .unwrap();

        assert!(matches!(
            f.service.review_eligibility(r.id, guest).await,
            Err(CoreError::NotCompleted(_))
        ));

        assert_eq!(f.service.complete_elapsed(d(2024, 7, 2)).await.unwrap(), 0);
        assert_eq!(f.service.complete_elapsed(d(2024, 7, 3)).await.unwrap(), 1);

        assert!(matches!(
            f.service.review_eligibility(r.id, f.host).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(f.service.review_eligibility(r.id, guest).await.is_ok());

        f.service.mark_guest_reviewed(r.id, guest).await.unwrap();
        assert!(matches!(
            f.service.mark_guest_reviewed(r.id, guest).await,
            Err(CoreError::AlreadyReviewed(_))
        ));

        // Completed is terminal
        assert!(matches!(
            f.service.cancel_reservation(r.id, guest).await,
            Err(CoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn stale_pending_reservations_expire() {
        let f = fixture().await;
        let r = f
            .service
            .create_reservation(f.listing.id, Uuid::new_v4(), &range(d(2024, 7, 1), d(2024, 7, 3)), d(2024, 6, 1))
            .await
            .unwrap();

        assert_eq!(f.service.expire_unconfirmed(Utc::now()).await.unwrap(), 0);
        assert_eq!(
            f.service.expire_unconfirmed(Utc::now() + Duration::hours(25)).await.unwrap(),
            1
        );
        let expired = f.repo.get_reservation(r.id).await.unwrap().unwrap();
        assert_eq!(expired.status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn filter_available_preserves_order() {
        let f = fixture().await;
        let today = d(2024, 6, 1);
        let second = listing(f.host, 90);
        let third = listing(f.host, 70);
        f.repo.add_listing(second.clone()).await;
        f.repo.add_listing(third.clone()).await;

        f.service
            .create_reservation(second.id, Uuid::new_v4(), &range(d(2024, 7, 10), d(2024, 7, 15)), today)
            .await
            .unwrap();

        let candidates = vec![third.clone(), second.clone(), f.listing.clone()];
        let free = f
            .service
            .filter_available(candidates, &range(d(2024, 7, 14), d(2024, 7, 16)))
            .await
            .unwrap();
        let ids: Vec<Uuid> = free.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![third.id, f.listing.id]);

        let back_to_back = f
            .service
            .filter_available(vec![second.clone()], &range(d(2024, 7, 15), d(2024, 7, 16)))
            .await
            .unwrap();
        assert_eq!(back_to_back.len(), 1);
    }

    #[tokio::test]
    async fn search_excludes_booked_listings() {
        let f = fixture().await;
        let today = d(2024, 6, 1);
        let other = listing(f.host, 250);
        f.repo.add_listing(other.clone()).await;
        f.service
            .create_reservation(f.listing.id, Uuid::new_v4(), &range(d(2024, 7, 10), d(2024, 7, 15)), today)
            .await
            .unwrap();

        let query = ListingSearch {
            location: Some("oslo".to_string()),
            range: Some(range(d(2024, 7, 12), d(2024, 7, 14))),
            ..Default::default()
        };
        let page = f.service.search(&query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.listings[0].id, other.id);

        let cheap = ListingSearch {
            max_price: Some(150),
            ..Default::default()
        };
        let page = f.service.search(&cheap).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.listings[0].id, f.listing.id);
    }

    #[tokio::test]
    async fn calendar_disables_checkout_day() {
        let f = fixture().await;
        let today = d(2024, 6, 1);
        f.service
            .create_reservation(f.listing.id, Uuid::new_v4(), &range(d(2024, 7, 10), d(2024, 7, 15)), today)
            .await
            .unwrap();

        let cal = f.service.calendar(f.listing.id, today).await.unwrap();
        assert!(cal.is_disabled(d(2024, 5, 31)));
        assert!(cal.is_disabled(d(2024, 7, 15)));
        assert!(!cal.is_disabled(d(2024, 7, 16)));
        // The booking path still accepts a check-in on that day
        assert!(f
            .service
            .is_available(f.listing.id, &range(d(2024, 7, 15), d(2024, 7, 17)), today)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn trips_split_on_today() {
        let f = fixture().await;
        let guest = Uuid::new_v4();
        let booked_on = d(2024, 6, 1);
        for (from, to) in [
            (d(2024, 6, 2), d(2024, 6, 4)),
            (d(2024, 8, 1), d(2024, 8, 3)),
            (d(2024, 7, 1), d(2024, 7, 3)),
        ] {
            f.service
                .create_reservation(f.listing.id, guest, &range(from, to), booked_on)
                .await
                .unwrap();
        }

        let trips = f.service.trips(guest, d(2024, 6, 20)).await.unwrap();
        let upcoming: Vec<NaiveDate> = trips.upcoming.iter().map(|r| r.check_in_date).collect();
        assert_eq!(upcoming, vec![d(2024, 7, 1), d(2024, 8, 1)]);
        assert_eq!(trips.past.len(), 1);
    }

    #[tokio::test]
    async fn events_are_published() {
        let events = Arc::new(RecordingEvents::default());
        let f = fixture_with(BookingRules::default(), events.clone()).await;
        let guest = Uuid::new_v4();
        let r = f
            .service
            .create_reservation(f.listing.id, guest, &range(d(2024, 7, 1), d(2024, 7, 3)), d(2024, 6, 1))
            .await
            .unwrap();
        f.service.cancel_reservation(r.id, guest).await.unwrap();

        let created = events.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].reservation_id, r.id);
        assert_eq!(created[0].host_id, f.host);
        assert_eq!(created[0].confirmation_code.expose(), &r.confirmation_code);

        let changed = events.changed.lock().unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].to, "cancelled");
    }

    #[tokio::test]
    async fn reservation_visible_to_guest_and_host_only() {
        let f = fixture().await;
        let guest = Uuid::new_v4();
        let r = f
            .service
            .create_reservation(f.listing.id, guest, &range(d(2024, 7, 1), d(2024, 7, 3)), d(2024, 6, 1))
            .await
            .unwrap();
        assert!(f.service.get_reservation(r.id, guest).await.is_ok());
        assert!(f.service.get_reservation(r.id, f.host).await.is_ok());
        assert!(matches!(
            f.service.get_reservation(r.id, Uuid::new_v4()).await,
            Err(CoreError::Forbidden(_))
        ));
    }
}
