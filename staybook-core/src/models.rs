use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::pricing::Quote;
use crate::range::DateRange;

/// Reservation status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }

    /// Pending and confirmed reservations hold their dates.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Pending, Completed) | (Confirmed, Completed)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            "completed" => Ok(ReservationStatus::Completed),
            other => Err(format!("unknown reservation status: {}", other)),
        }
    }
}

/// A rentable place. Read-only from the booking engine's point of view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub id: Uuid,
    pub host_id: Uuid,
    pub title: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    /// Nightly rate in whole currency units
    pub price: i64,
    /// Shown on the listing page, not used when pricing a stay
    pub weekend_price: Option<i64>,
    pub guest_count: i32,
    pub bedroom_count: i32,
    pub bed_count: i32,
    pub bathroom_count: i32,
    pub category_id: Option<Uuid>,
    pub privacy_type_id: Option<Uuid>,
    pub amenity_ids: Vec<Uuid>,
    pub host_type: Option<String>,
    pub is_published: bool,
    pub is_listed: bool,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn is_bookable(&self) -> bool {
        self.is_published && self.is_listed
    }
}

/// A guest's stay on a listing. Only `status` and `guest_reviewed_host`
/// change after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub guest_id: Uuid,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub status: ReservationStatus,
    pub total_price: i64,
    pub nights: i32,
    pub price_per_night: i64,
    pub confirmation_code: String,
    pub guest_reviewed_host: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        listing_id: Uuid,
        guest_id: Uuid,
        range: &DateRange,
        quote: &Quote,
        status: ReservationStatus,
        confirmation_code: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            listing_id,
            guest_id,
            check_in_date: range.from,
            check_out_date: range.to,
            status,
            total_price: quote.total,
            nights: quote.nights,
            price_per_night: quote.price_per_night,
            confirmation_code,
            guest_reviewed_host: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn range(&self) -> DateRange {
        DateRange {
            from: self.check_in_date,
            to: self.check_out_date,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
