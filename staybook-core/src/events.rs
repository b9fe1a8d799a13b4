use async_trait::async_trait;
use staybook_shared::{ReservationCreatedEvent, ReservationStatusChangedEvent};

pub const RESERVATION_CREATED_TOPIC: &str = "reservation.created";
pub const RESERVATION_STATUS_TOPIC: &str = "reservation.status_changed";

/// Outbound reservation events, consumed by notification delivery.
/// Publishing happens after commit; a failure here never undoes a booking.
#[async_trait]
pub trait ReservationEvents: Send + Sync {
    async fn reservation_created(
        &self,
        event: &ReservationCreatedEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn status_changed(
        &self,
        event: &ReservationStatusChangedEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Drops every event. Used when no broker is configured.
pub struct NoopEvents;

#[async_trait]
impl ReservationEvents for NoopEvents {
    async fn reservation_created(
        &self,
        _event: &ReservationCreatedEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    async fn status_changed(
        &self,
        _event: &ReservationStatusChangedEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}
