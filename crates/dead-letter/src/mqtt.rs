//! MQTT dead-letter publisher

use crate::record::{DeadLetterRecord, DEFAULT_DLQ_SUFFIX};
use crate::{DeadLetterError, DeadLetterSink};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// MQTT sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSinkConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    /// Appended to the source topic
    pub topic_suffix: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttSinkConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "telemetry-guard".to_string(),
            topic_suffix: DEFAULT_DLQ_SUFFIX.to_string(),
            keep_alive_secs: 30,
        }
    }
}

/// Publishes dead-letter messages to `<source_topic><suffix>` with at-least-once QoS
pub struct MqttDeadLetterSink {
    client: AsyncClient,
    topic_suffix: String,
}

impl MqttDeadLetterSink {
    /// Create the client and spawn its event loop. Must be called within a tokio runtime.
    pub fn connect(config: &MqttSinkConfig) -> Self {
        let mut options = MqttOptions::new(
            format!("{}-dlq", config.client_id),
            &config.broker_host,
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        let (client, mut eventloop) = AsyncClient::new(options, 64);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(incoming)) => {
                        debug!("MQTT incoming: {:?}", incoming);
                    }
                    Err(e) => {
                        error!("MQTT error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    _ => {}
                }
            }
        });

        info!(
            host = %config.broker_host,
            port = config.broker_port,
            suffix = %config.topic_suffix,
            "Dead-letter MQTT sink started"
        );
        Self {
            client,
            topic_suffix: config.topic_suffix.clone(),
        }
    }

    pub fn topic_for(&self, record: &DeadLetterRecord) -> String {
        record.destination(&self.topic_suffix)
    }
}

#[async_trait]
impl DeadLetterSink for MqttDeadLetterSink {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        let payload = record.to_message().to_bytes()?;
        let topic = self.topic_for(record);

        self.client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| DeadLetterError::Publish(e.to_string()))?;

        info!(topic = %topic, id = %record.id, "Published dead-letter message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use event_model::{CriticalityTier, EventEnvelope, FailureClass};

    #[tokio::test]
    async fn test_topic_uses_configured_suffix() {
        let sink = MqttDeadLetterSink::connect(&MqttSinkConfig {
            topic_suffix: ".dead".to_string(),
            ..Default::default()
        });
        let record = DeadLetterRecord::new(
            EventEnvelope::new("db-1", "QUEUE_CAPACITY", "capacity-monitoring", 0, 3),
            FailureClass::RetriesExhausted,
            "3 attempts failed",
            "Transient",
            3,
            Utc::now(),
            "capacity-consumer",
            CriticalityTier::Standard,
        );
        assert_eq!(sink.topic_for(&record), "capacity-monitoring.dead");
    }
}
