//! Kafka transport.
//!
//! One producer and one consumer per process. The consumer joins a group that
//! is unique to the process, so every instance sees every reply on the topic;
//! received payloads are fanned out to local subscriptions through a broadcast
//! channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    BrokerError, Result,
    broker::{MessagePublisher, MessageStream, MessageSubscriber, broadcast_stream},
};

const CHANNEL_CAPACITY: usize = 1024;

/// Configuration for the Kafka broker.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Topic carrying order and stock messages.
    pub topic: String,
    /// Prefix of the per-process consumer group id.
    pub group_prefix: String,
    /// How long a produce call may wait for delivery.
    pub send_timeout: Duration,
}

impl KafkaConfig {
    pub fn new(bootstrap_servers: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            topic: topic.into(),
            group_prefix: "order-service".to_string(),
            send_timeout: Duration::from_secs(5),
        }
    }

    fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("message.timeout.ms", "5000");
        config.set("acks", "all");
        config.set("enable.idempotence", "true");
        config
    }

    fn build_consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", format!("{}-{}", self.group_prefix, Uuid::new_v4()));
        config.set("enable.auto.commit", "true");
        config.set("auto.offset.reset", "latest");
        config
    }
}

/// Kafka-backed publisher and subscriber.
#[derive(Clone)]
pub struct KafkaBroker {
    producer: FutureProducer,
    config: KafkaConfig,
    sender: broadcast::Sender<Arc<Vec<u8>>>,
}

impl KafkaBroker {
    /// Connects the producer and starts the consumer task.
    pub async fn connect(config: KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config.build_producer_config().create().map_err(|e| {
            BrokerError::Connection(format!("Failed to create Kafka producer: {}", e))
        })?;

        let consumer: StreamConsumer = config.build_consumer_config().create().map_err(|e| {
            BrokerError::Connection(format!("Failed to create Kafka consumer: {}", e))
        })?;
        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| BrokerError::Subscribe(format!("Failed to subscribe to topic: {}", e)))?;

        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let fanout = sender.clone();

        tokio::spawn(async move {
            let mut stream = consumer.stream();
            while let Some(result) = stream.next().await {
                match result {
                    Ok(message) => match message.payload() {
                        Some(payload) => {
                            debug!(
                                partition = message.partition(),
                                offset = message.offset(),
                                "received message"
                            );
                            // No local subscriptions is fine.
                            let _ = fanout.send(Arc::new(payload.to_vec()));
                        }
                        None => warn!("received message with no payload"),
                    },
                    Err(e) => error!(component = "messaging", error = %e, "Kafka consumer error"),
                }
            }
            info!("Kafka consumer stream ended");
        });

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            topic = %config.topic,
            "Connected to Kafka"
        );

        Ok(Self {
            producer,
            config,
            sender,
        })
    }
}

#[async_trait]
impl MessagePublisher for KafkaBroker {
    async fn publish(&self, payload: &[u8], key: Option<&str>) -> Result<()> {
        let mut record = FutureRecord::<str, [u8]>::to(&self.config.topic).payload(payload);
        if let Some(k) = key {
            record = record.key(k);
        }

        self.producer
            .send(record, self.config.send_timeout)
            .await
            .map_err(|(e, _)| BrokerError::Publish(format!("Failed to publish: {}", e)))?;

        debug!(topic = %self.config.topic, key, "published message to Kafka");
        Ok(())
    }
}

#[async_trait]
impl MessageSubscriber for KafkaBroker {
    async fn subscribe(&self) -> Result<MessageStream> {
        Ok(broadcast_stream(self.sender.subscribe()))
    }
}
