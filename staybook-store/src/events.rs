use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, error};

use staybook_core::events::{ReservationEvents, RESERVATION_CREATED_TOPIC, RESERVATION_STATUS_TOPIC};
use staybook_shared::{ReservationCreatedEvent, ReservationStatusChangedEvent};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                debug!(
                    "Sent {} for {}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

// Keyed by listing so every event for a listing lands on one partition, in order.
#[async_trait]
impl ReservationEvents for EventProducer {
    async fn reservation_created(
        &self,
        event: &ReservationCreatedEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_string(event)?;
        self.publish(RESERVATION_CREATED_TOPIC, &event.listing_id.to_string(), &payload)
            .await?;
        Ok(())
    }

    async fn status_changed(
        &self,
        event: &ReservationStatusChangedEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_string(event)?;
        self.publish(RESERVATION_STATUS_TOPIC, &event.listing_id.to_string(), &payload)
            .await?;
        Ok(())
    }
}
