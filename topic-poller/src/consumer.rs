use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientConfig, Message};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::binding::{Topic, TopicBinding};
use crate::config::KafkaConfig;
use crate::error::{ConnectionError, FetchError, ShutdownError};
use crate::record::RawRecord;

/// A live subscription to one topic.
#[async_trait]
pub trait TopicConsumer: Send + Sync {
    fn topic(&self) -> Topic;

    /// Wait up to `timeout` for the next record. `Ok(None)` means nothing
    /// arrived in time, which is the normal outcome on a quiet topic.
    async fn fetch_one(&self, timeout: Duration) -> Result<Option<RawRecord>, FetchError>;

    /// Release the connection and partition assignment. Calling it again is
    /// a no-op.
    async fn stop(&self) -> Result<(), ShutdownError>;
}

pub type ConsumerHandle = Arc<dyn TopicConsumer>;

/// Opens one consumer per binding.
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    async fn connect(&self, binding: &TopicBinding) -> Result<ConsumerHandle, ConnectionError>;
}

pub struct KafkaConsumerFactory {
    config: KafkaConfig,
}

impl KafkaConsumerFactory {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", self.config.bootstrap_servers.as_str())
            .set("group.id", self.config.group_id.as_str())
            .set("auto.offset.reset", &self.config.offset_reset)
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                self.config.auto_commit_interval_ms.to_string(),
            )
            // Offsets are stored by hand right after each fetch; the
            // auto-commit timer then picks them up.
            .set("enable.auto.offset.store", "false");

        if self.config.tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        client_config
    }
}

#[async_trait]
impl ConsumerFactory for KafkaConsumerFactory {
    async fn connect(&self, binding: &TopicBinding) -> Result<ConsumerHandle, ConnectionError> {
        let topic = binding.topic();
        let timeout = self.config.startup_timeout.0;

        let consumer: StreamConsumer = self
            .client_config()
            .create()
            .map_err(|source| ConnectionError::Client { topic, source })?;

        // Creating the client does not touch the network, so ask for the
        // topic's metadata to find out whether the broker answers at all.
        let topic_name = binding.topic_name().to_owned();
        let (consumer, metadata) = tokio::task::spawn_blocking(move || {
            let metadata = consumer
                .fetch_metadata(Some(topic_name.as_str()), timeout)
                .map(|metadata| {
                    metadata
                        .topics()
                        .iter()
                        .map(|t| (t.partitions().len(), t.error().map(RDKafkaErrorCode::from)))
                        .next()
                });
            (consumer, metadata)
        })
        .await
        .map_err(|_| ConnectionError::ProbeAborted { topic })?;

        match metadata.map_err(|source| ConnectionError::Broker {
            topic,
            timeout,
            source,
        })? {
            Some((partitions, None)) => {
                debug!(%topic, partitions, "broker metadata received")
            }
            Some((_, Some(error))) => warn!(
                %topic,
                topic_name = binding.topic_name(),
                %error,
                "broker reported a topic error, subscribing anyway"
            ),
            None => {}
        }

        consumer
            .subscribe(&[binding.topic_name()])
            .map_err(|source| ConnectionError::Client { topic, source })?;

        info!(
            %topic,
            topic_name = binding.topic_name(),
            group_id = self.config.group_id.as_str(),
            "kafka consumer subscribed"
        );

        Ok(Arc::new(KafkaTopicConsumer {
            topic,
            consumer: Mutex::new(Some(consumer)),
        }))
    }
}

pub struct KafkaTopicConsumer {
    topic: Topic,
    // Taken on stop; the lock also makes stop wait for an in-flight fetch.
    consumer: Mutex<Option<StreamConsumer>>,
}

#[async_trait]
impl TopicConsumer for KafkaTopicConsumer {
    fn topic(&self) -> Topic {
        self.topic
    }

    async fn fetch_one(&self, timeout: Duration) -> Result<Option<RawRecord>, FetchError> {
        let guard = self.consumer.lock().await;
        let consumer = guard.as_ref().ok_or(FetchError::Stopped(self.topic))?;

        let message = match tokio::time::timeout(timeout, consumer.recv()).await {
            Ok(message) => message?,
            Err(_) => return Ok(None),
        };

        consumer.store_offset_from_message(&message)?;

        Ok(Some(RawRecord {
            topic: message.topic().to_owned(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            value: message.payload().map(<[u8]>::to_vec),
            timestamp_millis: message.timestamp().to_millis(),
        }))
    }

    async fn stop(&self) -> Result<(), ShutdownError> {
        let Some(consumer) = self.consumer.lock().await.take() else {
            debug!(topic = %self.topic, "consumer already stopped");
            return Ok(());
        };

        let topic = self.topic;
        // Committing and closing both block on the broker.
        let committed = tokio::task::spawn_blocking(move || {
            let committed = match consumer.commit_consumer_state(CommitMode::Sync) {
                Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
                other => other,
            };
            consumer.unsubscribe();
            drop(consumer);
            committed
        })
        .await
        .map_err(|_| ShutdownError::Panicked { topic })?;

        committed.map_err(|source| ShutdownError::Commit { topic, source })?;
        info!(%topic, "kafka consumer stopped");
        Ok(())
    }
}
