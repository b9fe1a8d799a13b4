use chrono::NaiveDate;
use uuid::Uuid;

use crate::pii::Masked;

/// Published after a reservation row has been committed.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ReservationCreatedEvent {
    pub reservation_id: Uuid,
    pub listing_id: Uuid,
    pub guest_id: Uuid,
    pub host_id: Uuid,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub nights: i32,
    pub total_price: i64,
    pub status: String,
    pub confirmation_code: Masked<String>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct ReservationStatusChangedEvent {
    pub reservation_id: Uuid,
    pub listing_id: Uuid,
    pub from: String,
    pub to: String,
    pub timestamp: i64,
}
