pub mod models;
pub mod pii;

pub use models::events::{ReservationCreatedEvent, ReservationStatusChangedEvent};
pub use pii::Masked;
