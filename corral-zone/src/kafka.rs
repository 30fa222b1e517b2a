//! Broker-protocol seam. Lag and replica views combine znode reads with
//! queries the brokers answer themselves (high-water marks, partition
//! metadata); this trait is the boundary between the two.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerApiError {
    /// The topic or partition is not known to the cluster. Callers skip the
    /// affected unit of work rather than aborting the round.
    #[error("unknown topic or partition")]
    UnknownTopicOrPartition,

    #[error("broker transport error: {0}")]
    Transport(String),
}

pub type BrokerResult<T> = std::result::Result<T, BrokerApiError>;

/// Broker-reported partition metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMeta {
    pub id: i32,
    /// Leader broker id, `-1` while leaderless.
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

impl PartitionMeta {
    pub fn writable(&self) -> bool {
        self.leader >= 0
    }
}

#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Current high-water mark of one partition.
    async fn latest_offset(&self, topic: &str, partition: i32) -> BrokerResult<i64>;

    async fn topics(&self) -> BrokerResult<Vec<String>>;

    async fn partitions(&self, topic: &str) -> BrokerResult<Vec<PartitionMeta>>;

    /// Issue a create-topic request and return the human-readable step log.
    async fn create_topic(
        &self,
        topic: &str,
        partitions: i32,
        replicas: i32,
    ) -> BrokerResult<Vec<String>>;

    /// Partitions that currently have a leader and accept writes.
    async fn writable_partitions(&self, topic: &str) -> BrokerResult<Vec<i32>> {
        Ok(self
            .partitions(topic)
            .await?
            .into_iter()
            .filter(PartitionMeta::writable)
            .map(|p| p.id)
            .collect())
    }

    async fn replicas(&self, topic: &str, partition: i32) -> BrokerResult<Vec<i32>> {
        self.partitions(topic)
            .await?
            .into_iter()
            .find(|p| p.id == partition)
            .map(|p| p.replicas)
            .ok_or(BrokerApiError::UnknownTopicOrPartition)
    }
}

fn map_kafka_err(err: KafkaError) -> BrokerApiError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::UnknownTopicOrPartition) => BrokerApiError::UnknownTopicOrPartition,
        _ => BrokerApiError::Transport(err.to_string()),
    }
}

/// Live broker-protocol client. Metadata and watermark fetches block on the
/// wire, so they run on the blocking pool.
pub struct KafkaApi {
    consumer: Arc<BaseConsumer>,
    admin: AdminClient<DefaultClientContext>,
    timeout: Duration,
}

impl KafkaApi {
    pub fn connect(brokers: &[String]) -> BrokerResult<Self> {
        if brokers.is_empty() {
            return Err(BrokerApiError::Transport("empty broker list".to_string()));
        }
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", brokers.join(","));

        let consumer: BaseConsumer = config.create().map_err(map_kafka_err)?;
        let admin: AdminClient<DefaultClientContext> = config.create().map_err(map_kafka_err)?;
        Ok(KafkaApi {
            consumer: Arc::new(consumer),
            admin,
            timeout: Duration::from_secs(10),
        })
    }

    async fn fetch_metadata(&self, topic: Option<String>) -> BrokerResult<rdkafka::metadata::Metadata> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(topic.as_deref(), timeout)
                .map_err(map_kafka_err)
        })
        .await
        .map_err(|e| BrokerApiError::Transport(e.to_string()))?
    }
}

#[async_trait]
impl BrokerApi for KafkaApi {
    async fn latest_offset(&self, topic: &str, partition: i32) -> BrokerResult<i64> {
        let consumer = Arc::clone(&self.consumer);
        let topic = topic.to_string();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || {
            consumer
                .fetch_watermarks(&topic, partition, timeout)
                .map(|(_low, high)| high)
                .map_err(map_kafka_err)
        })
        .await
        .map_err(|e| BrokerApiError::Transport(e.to_string()))?
    }

    async fn topics(&self) -> BrokerResult<Vec<String>> {
        let metadata = self.fetch_metadata(None).await?;
        Ok(metadata
            .topics()
            .iter()
            .map(|t| t.name().to_string())
            .collect())
    }

    async fn partitions(&self, topic: &str) -> BrokerResult<Vec<PartitionMeta>> {
        let metadata = self.fetch_metadata(Some(topic.to_string())).await?;
        let topic_meta = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .ok_or(BrokerApiError::UnknownTopicOrPartition)?;
        Ok(topic_meta
            .partitions()
            .iter()
            .map(|p| PartitionMeta {
                id: p.id(),
                leader: p.leader(),
                replicas: p.replicas().to_vec(),
                isr: p.isr().to_vec(),
            })
            .collect())
    }

    async fn create_topic(
        &self,
        topic: &str,
        partitions: i32,
        replicas: i32,
    ) -> BrokerResult<Vec<String>> {
        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(replicas));
        let results = self
            .admin
            .create_topics([&new_topic], &AdminOptions::new())
            .await
            .map_err(map_kafka_err)?;

        let mut log = vec![format!(
            "create topic {} partitions:{} replication-factor:{}",
            topic, partitions, replicas
        )];
        for result in results {
            match result {
                Ok(name) => log.push(format!("created topic \"{}\"", name)),
                Err((name, code)) => {
                    return Err(BrokerApiError::Transport(format!("{}: {}", name, code)))
                }
            }
        }
        Ok(log)
    }
}

/// Fixed-answer broker API. SHOULD BE USED ONLY FOR TESTING PURPOSES.
#[derive(Debug, Clone, Default)]
pub struct StaticBrokerApi {
    topics: BTreeMap<String, Vec<PartitionMeta>>,
    watermarks: BTreeMap<(String, i32), i64>,
    failed_replicas: BTreeSet<(String, i32)>,
}

impl StaticBrokerApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topic(mut self, topic: &str, partitions: Vec<PartitionMeta>) -> Self {
        self.topics.insert(topic.to_string(), partitions);
        self
    }

    pub fn with_watermark(mut self, topic: &str, partition: i32, high: i64) -> Self {
        self.watermarks.insert((topic.to_string(), partition), high);
        self
    }

    /// Make replica fetches for one partition fail with a transport error.
    pub fn with_failed_replica(mut self, topic: &str, partition: i32) -> Self {
        self.failed_replicas.insert((topic.to_string(), partition));
        self
    }
}

#[async_trait]
impl BrokerApi for StaticBrokerApi {
    async fn latest_offset(&self, topic: &str, partition: i32) -> BrokerResult<i64> {
        self.watermarks
            .get(&(topic.to_string(), partition))
            .copied()
            .ok_or(BrokerApiError::UnknownTopicOrPartition)
    }

    async fn topics(&self) -> BrokerResult<Vec<String>> {
        Ok(self.topics.keys().cloned().collect())
    }

    async fn partitions(&self, topic: &str) -> BrokerResult<Vec<PartitionMeta>> {
        self.topics
            .get(topic)
            .cloned()
            .ok_or(BrokerApiError::UnknownTopicOrPartition)
    }

    async fn replicas(&self, topic: &str, partition: i32) -> BrokerResult<Vec<i32>> {
        if self
            .failed_replicas
            .contains(&(topic.to_string(), partition))
        {
            return Err(BrokerApiError::Transport("replica fetch failed".to_string()));
        }
        self.partitions(topic)
            .await?
            .into_iter()
            .find(|p| p.id == partition)
            .map(|p| p.replicas)
            .ok_or(BrokerApiError::UnknownTopicOrPartition)
    }

    async fn create_topic(
        &self,
        topic: &str,
        partitions: i32,
        replicas: i32,
    ) -> BrokerResult<Vec<String>> {
        Ok(vec![format!(
            "create topic {} partitions:{} replication-factor:{}",
            topic, partitions, replicas
        )])
    }
}
