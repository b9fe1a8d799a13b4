use chrono::{DateTime, Utc};
use staybook_core::BookingService;
use tokio::time::{interval, Duration};
use tracing::{error, info};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Moves reservations through their time-driven transitions: stays past
/// checkout become completed, pending requests the host ignored expire.
pub async fn start_lifecycle_worker(booking: BookingService, every: Duration) {
    let every = every.max(MIN_INTERVAL);
    info!("Lifecycle worker started, running every {:?}", every);
    let mut ticker = interval(every);
    loop {
        ticker.tick().await;
        run_lifecycle_pass(&booking, Utc::now()).await;
    }
}

/// One pass of the worker. Failures are logged and retried on the next tick.
pub async fn run_lifecycle_pass(booking: &BookingService, now: DateTime<Utc>) -> (u64, u64) {
    let completed = booking.complete_elapsed(now.date_naive()).await.unwrap_or_else(|e| {
        error!("Failed to complete elapsed reservations: {}", e);
        0
    });
    let expired = booking.expire_unconfirmed(now).await.unwrap_or_else(|e| {
        error!("Failed to expire unconfirmed reservations: {}", e);
        0
    });
    (completed, expired)
}
