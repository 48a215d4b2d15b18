//! Stand-in for the stream-processing runtime named in the scheduling
//! engine's out-of-scope list: topic/partition primitives, a producer, a
//! consumer, and partition-assignment callbacks. `LocalBroker` below is an
//! in-process implementation good for the bundled example and the test
//! suite; it is not a deployment target.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::record::Headers;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BrokerOffset(pub i64);

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),
    #[error("partition {partition} out of range for topic `{topic}` ({num_partitions} partitions)")]
    PartitionOutOfRange {
        topic: String,
        partition: u32,
        num_partitions: u32,
    },
    #[error("send to `{topic}` timed out before an offset was assigned")]
    SendTimedOut { topic: String },
}

#[derive(Clone, Debug)]
pub struct ConsumedRecord {
    pub partition: u32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: Option<String>,
    pub headers: Headers,
}

/// Publishes records to topics. Implementations may assign the partition
/// themselves (key-hash) when `partition` is `None`; the scheduler always
/// passes an explicit partition when it needs to preserve the ingress
/// partition across a hop (`distribute` re-publishing to `actions`).
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    async fn send(
        &self,
        topic: &str,
        partition: Option<u32>,
        key: Option<String>,
        value: Option<String>,
        headers: Headers,
    ) -> Result<BrokerOffset, BrokerError>;
}

/// Polls topic partitions. `poll` is non-blocking: `None` means "nothing
/// available right now", not "end of partition" (the scheduler never treats
/// its internal topics as bounded).
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    async fn poll(&self, topic: &str, partition: u32) -> Option<ConsumedRecord>;

    fn num_partitions(&self, topic: &str) -> Option<u32>;
}

/// Mirrors `pre_rebalance`/`post_rebalance`: a "starting" notification the
/// owner must observe before partitions move, and an "assigned" notification
/// carrying the new partition set. A real consumer-group client would call
/// these from its own rebalance protocol; `LocalBroker::trigger_rebalance`
/// calls them directly for tests and the example binary.
#[async_trait]
pub trait RebalanceListener: Send + Sync + 'static {
    async fn on_rebalance_started(&self) {}

    async fn on_partitions_revoked(&self, _revoked: &[u32]) {}

    async fn on_partitions_assigned(&self, _assigned: &[u32]) {}
}

struct Topic {
    partitions: Vec<Vec<ConsumedRecord>>,
    cursors: Vec<usize>,
}

impl Topic {
    fn new(num_partitions: u32) -> Self {
        Topic {
            partitions: (0..num_partitions).map(|_| Vec::new()).collect(),
            cursors: vec![0; num_partitions as usize],
        }
    }
}

/// An in-process broker: topics are named logs of partitions, each an
/// append-only `Vec`. Good enough to exercise every code path in this crate
/// without a running Kafka cluster.
#[derive(Default)]
pub struct LocalBroker {
    topics: Mutex<HashMap<String, Topic>>,
}

impl LocalBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(LocalBroker::default())
    }

    pub fn ensure_topic(&self, topic: &str, num_partitions: u32) {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(num_partitions));
    }

    fn partition_for_key(key: &Option<String>, num_partitions: u32) -> u32 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % num_partitions as u64) as u32
    }

    /// Drives the rebalance callback sequence a consumer-group client would
    /// invoke, against whichever listeners have been subscribed.
    pub async fn trigger_rebalance(
        &self,
        listener: &dyn RebalanceListener,
        revoked: &[u32],
        assigned: &[u32],
    ) {
        listener.on_rebalance_started().await;
        if !revoked.is_empty() {
            listener.on_partitions_revoked(revoked).await;
        }
        if !assigned.is_empty() {
            listener.on_partitions_assigned(assigned).await;
        }
    }
}

#[async_trait]
impl Producer for LocalBroker {
    async fn send(
        &self,
        topic: &str,
        partition: Option<u32>,
        key: Option<String>,
        value: Option<String>,
        headers: Headers,
    ) -> Result<BrokerOffset, BrokerError> {
        let mut topics = self.topics.lock().unwrap();
        let entry = topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
        let num_partitions = entry.partitions.len() as u32;
        let target_partition = partition.unwrap_or_else(|| Self::partition_for_key(&key, num_partitions));
        if target_partition >= num_partitions {
            return Err(BrokerError::PartitionOutOfRange {
                topic: topic.to_string(),
                partition: target_partition,
                num_partitions,
            });
        }
        let log = &mut entry.partitions[target_partition as usize];
        let offset = log.len() as i64;
        log.push(ConsumedRecord {
            partition: target_partition,
            offset,
            key,
            value,
            headers,
        });
        debug!(topic, partition = target_partition, offset, "produced record");
        Ok(BrokerOffset(offset))
    }
}

#[async_trait]
impl Consumer for LocalBroker {
    async fn poll(&self, topic: &str, partition: u32) -> Option<ConsumedRecord> {
        let mut topics = self.topics.lock().unwrap();
        let entry = topics.get_mut(topic)?;
        let cursor = entry.cursors.get_mut(partition as usize)?;
        let log = entry.partitions.get(partition as usize)?;
        let record = log.get(*cursor).cloned();
        if record.is_some() {
            *cursor += 1;
        }
        record
    }

    fn num_partitions(&self, topic: &str) -> Option<u32> {
        let topics = self.topics.lock().unwrap();
        topics.get(topic).map(|topic| topic.partitions.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_record_through_a_topic() {
        let broker = LocalBroker::new();
        broker.ensure_topic("t", 2);
        let offset = broker
            .send("t", Some(0), Some("k".to_string()), Some("v".to_string()), vec![])
            .await
            .unwrap();
        assert_eq!(offset, BrokerOffset(0));

        let record = broker.poll("t", 0).await.unwrap();
        assert_eq!(record.key.as_deref(), Some("k"));
        assert_eq!(record.value.as_deref(), Some("v"));
        assert!(broker.poll("t", 0).await.is_none());
    }

    #[tokio::test]
    async fn send_to_an_unknown_topic_fails() {
        let broker = LocalBroker::new();
        let result = broker.send("missing", None, None, None, vec![]).await;
        assert!(matches!(result, Err(BrokerError::UnknownTopic(_))));
    }

    #[tokio::test]
    async fn out_of_range_partition_is_rejected() {
        let broker = LocalBroker::new();
        broker.ensure_topic("t", 1);
        let result = broker.send("t", Some(5), None, None, vec![]).await;
        assert!(matches!(result, Err(BrokerError::PartitionOutOfRange { .. })));
    }

    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RebalanceListener for RecordingListener {
        async fn on_rebalance_started(&self) {
            self.events.lock().unwrap().push("started".to_string());
        }

        async fn on_partitions_revoked(&self, revoked: &[u32]) {
            self.events
                .lock()
                .unwrap()
                .push(format!("revoked:{revoked:?}"));
        }

        async fn on_partitions_assigned(&self, assigned: &[u32]) {
            self.events
                .lock()
                .unwrap()
                .push(format!("assigned:{assigned:?}"));
        }
    }

    #[tokio::test]
    async fn trigger_rebalance_calls_back_in_order() {
        let broker = LocalBroker::new();
        let listener = RecordingListener {
            events: Mutex::new(Vec::new()),
        };
        broker.trigger_rebalance(&listener, &[0, 1], &[0, 2]).await;
        let events = listener.events.into_inner().unwrap();
        assert_eq!(events, vec!["started", "revoked:[0, 1]", "assigned:[0, 2]"]);
    }
}
