use anyhow::Context;
use staybook_api::{app, worker, AppState, AuthConfig};
use staybook_core::events::{NoopEvents, ReservationEvents};
use staybook_core::BookingService;
use staybook_store::app_config::Config;
use staybook_store::{DbClient, EventProducer, PgReservationRepository};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "staybook_api=debug,staybook_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Staybook API on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let events: Arc<dyn ReservationEvents> = if config.kafka.enabled {
        let producer = EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;
        Arc::new(producer)
    } else {
        tracing::warn!("Kafka disabled, reservation events will be dropped");
        Arc::new(NoopEvents)
    };

    let repo = Arc::new(PgReservationRepository::new(db.pool.clone(), &config.database));
    let booking = BookingService::new(repo, events, config.booking.clone());

    tokio::spawn(worker::start_lifecycle_worker(
        booking.clone(),
        Duration::from_secs(config.worker.interval_seconds),
    ));

    let state = AppState {
        booking,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}
