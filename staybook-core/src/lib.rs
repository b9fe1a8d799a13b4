pub mod availability;
pub mod booking;
pub mod calendar;
pub mod confirmation;
pub mod events;
pub mod memory;
pub mod models;
pub mod pricing;
pub mod range;
pub mod repository;
pub mod search;

pub use booking::{BookingRules, BookingService};
pub use models::{Listing, Reservation, ReservationStatus};
pub use range::DateRange;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid date range: {0}")]
    InvalidRange(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Dates no longer available for listing {listing_id}")]
    Conflict {
        listing_id: Uuid,
        /// Known when the conflict was found by the re-check, absent when the
        /// database constraint rejected the insert.
        conflicting: Option<Uuid>,
    },
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("Reservation {0} is not completed")]
    NotCompleted(Uuid),
    #[error("Reservation {0} has already been reviewed")]
    AlreadyReviewed(Uuid),
    #[error("Confirmation code collision")]
    DuplicateCode,
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
