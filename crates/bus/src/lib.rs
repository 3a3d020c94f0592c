//! Kafka plumbing for the two pipeline topics: the scraps topic feeding
//! the processing stage, and the advisory completion topic flowing back
//! to the collector stage.

use models::{CompletionNotice, ScrapEnvelope};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;

/// Default topic carrying scrap envelopes from collectors to processors.
pub const DEFAULT_SCRAPS_TOPIC: &str = "scraps";
/// Default topic carrying completion notices back to collectors.
pub const DEFAULT_COMPLETION_TOPIC: &str = "processed_topic";

/// Consumer group of the processing stage on the scraps topic.
pub const PROCESSING_GROUP: &str = "processing_group";
/// Consumer group of the collector stage on the completion topic.
pub const NOTIFICATION_GROUP: &str = "notification_group";

const SEND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kafka client error")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("failed to encode bus message")]
    Encode(#[from] serde_json::Error),
}

/// Producer over either topic. Clones share the underlying client.
#[derive(Clone)]
pub struct Producer {
    inner: FutureProducer,
}

impl Producer {
    pub fn connect(bootstrap_servers: &str) -> Result<Self, Error> {
        let inner = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", "60000")
            .create()?;
        Ok(Self { inner })
    }

    /// Publish a scrap envelope, keyed by the scrap hash so redeliveries
    /// of one hash land on one partition.
    pub async fn publish_scrap(
        &self,
        topic: &str,
        envelope: &ScrapEnvelope,
        hash: &str,
    ) -> Result<(), Error> {
        self.publish_json(topic, hash, envelope).await
    }

    pub async fn publish_completion(
        &self,
        topic: &str,
        notice: &CompletionNotice,
    ) -> Result<(), Error> {
        self.publish_json(topic, &notice.hash, notice).await
    }

    async fn publish_json<T: serde::Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(), Error> {
        let payload = serde_json::to_vec(value)?;

        self.inner
            .send(
                FutureRecord::to(topic).key(key).payload(&payload),
                Timeout::After(SEND_TIMEOUT),
            )
            .await
            .map_err(|(err, _message)| Error::Kafka(err))?;
        Ok(())
    }

    /// Drain any queued messages; used on graceful shutdown.
    pub fn flush(&self, timeout: Duration) -> Result<(), Error> {
        use rdkafka::producer::Producer as _;
        self.inner.flush(Timeout::After(timeout))?;
        Ok(())
    }
}

/// Source coordinates of one consumed message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageAt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// One decoded scrap envelope together with where it came from, so the
/// caller can decide exactly which offsets a commit may cover.
#[derive(Debug)]
pub struct Delivery {
    pub envelope: ScrapEnvelope,
    pub at: MessageAt,
}

/// One polled batch: decoded deliveries plus the coordinates of corrupt
/// messages that were dropped in place (committed past, never retried).
#[derive(Debug, Default)]
pub struct Batch {
    pub deliveries: Vec<Delivery>,
    pub dropped: Vec<MessageAt>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty() && self.dropped.is_empty()
    }
}

/// Manual-commit consumer of the scraps topic. Offsets advance only
/// when the caller commits explicit positions, after a batch's
/// processing futures have resolved: at-least-once, with idempotent
/// sinks downstream.
pub struct BatchConsumer {
    inner: StreamConsumer,
}

impl BatchConsumer {
    pub fn connect(bootstrap_servers: &str, group_id: &str, topic: &str) -> Result<Self, Error> {
        let inner: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        inner.subscribe(&[topic])?;
        Ok(Self { inner })
    }

    /// Gather up to `max` messages within `timeout`; an empty batch is
    /// normal when the topic is idle. Undecodable payloads are logged
    /// and reported through `Batch::dropped`.
    pub async fn poll_batch(&self, max: usize, timeout: Duration) -> Result<Batch, Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut batch = Batch::default();

        while batch.deliveries.len() < max {
            let message = match tokio::time::timeout_at(deadline, self.inner.recv()).await {
                Err(_elapsed) => break,
                Ok(received) => received?,
            };

            let at = MessageAt {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            };
            match decode_envelope(message.payload()) {
                Some(envelope) => batch.deliveries.push(Delivery { envelope, at }),
                None => batch.dropped.push(at),
            }
        }
        Ok(batch)
    }

    /// Commit explicit next-to-read positions, keyed by partition.
    pub fn commit_positions(
        &self,
        positions: &HashMap<(String, i32), i64>,
    ) -> Result<(), Error> {
        if positions.is_empty() {
            return Ok(());
        }

        let mut offsets = TopicPartitionList::new();
        for ((topic, partition), position) in positions {
            offsets.add_partition_offset(topic, *partition, Offset::Offset(*position))?;
        }
        self.inner.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }
}

/// Auto-commit consumer of the completion topic. Delivery here is
/// advisory; a lost or corrupt notice never affects correctness.
pub struct CompletionConsumer {
    inner: StreamConsumer,
}

impl CompletionConsumer {
    pub fn connect(bootstrap_servers: &str, group_id: &str, topic: &str) -> Result<Self, Error> {
        let inner: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()?;
        inner.subscribe(&[topic])?;
        Ok(Self { inner })
    }

    /// Receive the next decodable completion notice; corrupt messages
    /// are dropped in place.
    pub async fn recv(&self) -> Result<CompletionNotice, Error> {
        loop {
            let message = self.inner.recv().await?;
            if let Some(notice) = decode_completion(message.payload()) {
                return Ok(notice);
            }
        }
    }
}

fn decode_envelope(payload: Option<&[u8]>) -> Option<ScrapEnvelope> {
    let payload = payload?;
    match serde_json::from_slice(payload) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            tracing::warn!(%err, "dropping undecodable scrap envelope");
            None
        }
    }
}

fn decode_completion(payload: Option<&[u8]>) -> Option<CompletionNotice> {
    let payload = payload?;
    match serde_json::from_slice(payload) {
        Ok(notice) => Some(notice),
        Err(err) => {
            tracing::warn!(%err, "dropping undecodable completion notice");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_decodes_from_wire_json() {
        let payload: &[u8] =
            br#"{"scrap_data":"{}","mounted_path":"/mnt/u/f","unc_path":"\\\\srv\\s\\f"}"#;
        let envelope = decode_envelope(Some(payload)).unwrap();
        assert_eq!(envelope.mounted_path, "/mnt/u/f");
        assert_eq!(envelope.unc_path, r"\\srv\s\f");
    }

    #[test]
    fn corrupt_payloads_decode_to_none() {
        assert!(decode_envelope(Some(b"not json".as_slice())).is_none());
        assert!(decode_envelope(None).is_none());
        assert!(decode_completion(Some(b"{}".as_slice())).is_none());
        assert!(decode_completion(None).is_none());
    }

    #[test]
    fn completion_decodes_from_wire_json() {
        let payload: &[u8] = br#"{"scrap_id":3,"hash":"abc","status":"PROCESSED"}"#;
        let notice = decode_completion(Some(payload)).unwrap();
        assert!(notice.is_processed());
        assert_eq!(notice.scrap_id, 3);
    }
}
