//! Decoders for the JSON blobs brokers and consumers leave in znodes, plus
//! the epoch-string conventions they use for timestamps.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Epoch values above this are milliseconds, below it seconds. Brokers and
/// consumers disagree on the unit, so every reader reproduces this check.
pub const TIMESTAMP_MS_THRESHOLD: i64 = 143_761_237_100;

/// A znode stat time, epoch milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ZkTimestamp(pub i64);

impl ZkTimestamp {
    pub fn time(self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.0.max(0) as u64)
    }
}

impl From<i64> for ZkTimestamp {
    fn from(ms: i64) -> Self {
        ZkTimestamp(ms)
    }
}

/// Decode an epoch stored as a decimal string, auto-detecting the unit.
/// Unparseable input decodes to the epoch start.
pub fn timestamp_to_time(ts: &str) -> SystemTime {
    let mut sec = ts.trim().parse::<i64>().unwrap_or(0);
    if sec > TIMESTAMP_MS_THRESHOLD {
        sec /= 1000;
    }
    UNIX_EPOCH + Duration::from_secs(sec.max(0) as u64)
}

/// Registration record a live broker keeps under `/brokers/ids/<id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerZnode {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub jmx_port: i32,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub version: i32,
}

impl BrokerZnode {
    pub fn decode(id: &str, data: &[u8]) -> serde_json::Result<Self> {
        let mut broker: BrokerZnode = serde_json::from_slice(data)?;
        broker.id = id.to_string();
        Ok(broker)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uptime(&self) -> SystemTime {
        timestamp_to_time(&self.timestamp)
    }
}

/// `/controller` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerZnode {
    pub brokerid: i32,
}

/// The elected controller of a cluster, combined from `/controller` and
/// `/controller_epoch`.
#[derive(Debug, Clone)]
pub struct ControllerMeta {
    /// The owning broker; `None` when its registration vanished mid-read.
    pub broker: Option<BrokerZnode>,
    /// Mtime of the controller znode; changes on failover.
    pub mtime: ZkTimestamp,
    /// Generation counter as stored, a decimal string.
    pub epoch: String,
}

impl ControllerMeta {
    pub fn epoch_value(&self) -> Option<i64> {
        self.epoch.trim().parse().ok()
    }
}

/// `/brokers/topics/<topic>` payload: partition id -> assigned replica ids.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicZnode {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub partitions: BTreeMap<String, Vec<i32>>,
}

impl TopicZnode {
    pub fn decode(name: &str, data: &[u8]) -> serde_json::Result<Self> {
        let mut topic: TopicZnode = serde_json::from_slice(data)?;
        topic.name = name.to_string();
        Ok(topic)
    }
}

/// `/brokers/topics/<topic>/partitions/<id>/state` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartitionState {
    #[serde(default)]
    pub isr: Vec<i32>,
    #[serde(default = "no_leader")]
    pub leader: i32,
}

fn no_leader() -> i32 {
    -1
}

/// Consumer registration timestamps appear both as strings and as bare
/// numbers, depending on the client SDK.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Text(String),
    Number(i64),
}

impl Default for TimestampValue {
    fn default() -> Self {
        TimestampValue::Text(String::new())
    }
}

impl TimestampValue {
    fn as_decimal_string(&self) -> String {
        match self {
            TimestampValue::Text(s) => s.clone(),
            TimestampValue::Number(n) => n.to_string(),
        }
    }
}

/// One consumer process under `/consumers/<group>/ids/<id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerZnode {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub version: i32,
    /// topic -> consuming thread count
    #[serde(default)]
    pub subscription: BTreeMap<String, i32>,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub timestamp: TimestampValue,
}

impl ConsumerZnode {
    pub fn host(&self) -> String {
        host_of_consumer(&self.id)
    }

    /// Consumers registered through the pub/sub gateway encode the client's
    /// real address after an `@`.
    pub fn client_real_ip(&self) -> String {
        let host = self.host();
        match host.split_once('@') {
            Some((_, ip)) => ip.to_string(),
            None => host,
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.subscription.keys().cloned().collect()
    }

    pub fn uptime(&self) -> SystemTime {
        timestamp_to_time(&self.timestamp.as_decimal_string())
    }
}

/// Payload found under a consumer-id znode. Foreign SDKs leave shapes other
/// than the registration record (e.g. a bare topic name); those become
/// `Unknown` and never fail the pipeline.
#[derive(Debug, Clone)]
pub enum ConsumerIdRecord {
    Registration(ConsumerZnode),
    Unknown(Vec<u8>),
}

pub fn decode_consumer_record(id: &str, data: &[u8]) -> ConsumerIdRecord {
    match serde_json::from_slice::<ConsumerZnode>(data) {
        Ok(mut consumer) => {
            consumer.id = id.to_string();
            ConsumerIdRecord::Registration(consumer)
        }
        Err(_) => ConsumerIdRecord::Unknown(data.to_vec()),
    }
}

/// Extract the host segment of a consumer id.
///
/// JVM clients use `<group>_<host>-<unixMillis>-<uuidBits>` where the host
/// itself may contain dashes, so the parse walks backward skipping two
/// dash-delimited segments and then backward again to the `_` separator.
/// Gateway clients use `<id>@<realIp>:<uuid>`; everything before the colon is
/// the host part.
pub fn host_of_consumer(consumer_id: &str) -> String {
    if consumer_id.is_empty() {
        return String::new();
    }
    if let Some((head, _)) = consumer_id.split_once(':') {
        return head.to_string();
    }

    let bytes = consumer_id.as_bytes();
    let mut dash_n = 0;
    let mut hi = bytes.len() - 1;
    while hi > 0 {
        if bytes[hi] == b'-' {
            dash_n += 1;
            if dash_n == 2 {
                break;
            }
        }
        hi -= 1;
    }

    let mut lo = hi as i64;
    while lo >= 0 && bytes[lo as usize] != b'_' {
        lo -= 1;
    }

    consumer_id[(lo + 1) as usize..hi].to_string()
}

/// Extract the consumer id from an owner-znode payload.
///
/// JVM clients append `-<threadNum>` to the consumer id; such payloads always
/// contain a `_`, end in a dash-separated numeric segment, and the thread
/// number never exceeds three digits. Anything else is already a bare
/// consumer id.
pub fn consumer_id_of_owner(owner_data: &str) -> String {
    if !owner_data.contains('_') {
        return owner_data.to_string();
    }

    let last_dash = match owner_data.rfind('-') {
        Some(idx) if idx < owner_data.len() - 1 => idx,
        _ => return owner_data.to_string(),
    };

    let maybe_thread_num = &owner_data[last_dash + 1..];
    if maybe_thread_num.len() > 3 || !maybe_thread_num.bytes().all(|b| b.is_ascii_digit()) {
        return owner_data.to_string();
    }

    owner_data[..last_dash].to_string()
}

/// Webhook registration under `/pubsub/webhooks/<topic>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookMeta {
    pub cluster: String,
    pub endpoints: Vec<String>,
}

impl WebhookMeta {
    pub fn decode(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Derived per-partition lag snapshot for one consumer group. Recomputed on
/// every poll, never persisted.
#[derive(Debug, Clone, Default)]
pub struct ConsumerMeta {
    pub group: String,
    /// The group has at least one live member registration.
    pub online: bool,
    pub topic: String,
    pub partition_id: String,
    /// Mtime of the committed-offset znode, i.e. the last commit time.
    pub mtime: ZkTimestamp,
    pub consumer_offset: i64,
    /// Broker high-water mark.
    pub producer_offset: i64,
    pub lag: i64,
    /// The owning consumer's registration, when it can still be resolved.
    pub consumer: Option<ConsumerZnode>,
}

/// Manually rostered broker entry in the cluster descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerInfo {
    pub id: i32,
    pub host: String,
    pub port: u16,
}

impl BrokerInfo {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_replicas() -> i32 {
    2
}

fn default_priority() -> i32 {
    1
}

/// Operator-maintained cluster descriptor under `/_kafka_clusters_info/<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    #[serde(default)]
    pub nickname: String,
    /// Manually registered brokers; live brokers are tracked separately by
    /// their ephemeral nodes.
    #[serde(default)]
    pub roster: Vec<BrokerInfo>,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub retention_hours: i32,
}

impl Default for ClusterInfo {
    fn default() -> Self {
        ClusterInfo {
            nickname: String::new(),
            roster: Vec::new(),
            replicas: default_replicas(),
            priority: default_priority(),
            public: false,
            retention_hours: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn year_of(t: SystemTime) -> i64 {
        let secs = t.duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        1970 + secs / 31_556_952
    }

    #[test]
    fn test_broker_znode_decode() {
        let broker = BrokerZnode::decode(
            "5",
            br#"{"jmx_port":-1,"timestamp":"1447157138058","host":"192.168.3.5","version":1,"port":9092}"#,
        )
        .unwrap();
        assert_eq!(9092, broker.port);
        assert_eq!("192.168.3.5", broker.host);
        assert_eq!(1, broker.version);
        assert_eq!(-1, broker.jmx_port);
        assert_eq!("1447157138058", broker.timestamp);
        assert_eq!("5", broker.id);
        assert_eq!("192.168.3.5:9092", broker.addr());
    }

    #[test]
    fn test_zk_timestamp() {
        let t = ZkTimestamp(1_447_157_138_058).time();
        assert_eq!(2015, year_of(t));
    }

    #[test]
    fn test_timestamp_heuristic() {
        // just above the threshold: milliseconds
        let t = timestamp_to_time("143761637400");
        assert_eq!(UNIX_EPOCH + Duration::from_secs(143_761_637), t);
        assert_eq!(1974, year_of(t));

        // unambiguously milliseconds
        let t = timestamp_to_time("1447157138058");
        assert_eq!(UNIX_EPOCH + Duration::from_secs(1_447_157_138), t);
        assert_eq!(2015, year_of(t));

        // garbage decodes to the epoch start instead of failing
        assert_eq!(UNIX_EPOCH, timestamp_to_time("not-a-number"));
    }

    #[test]
    fn test_host_of_consumer() {
        let consumer = ConsumerZnode {
            id: "cloudparkingGroup_orderMsg_BJS0-D134-018-1447657979158-fa9d1dc8".to_string(),
            ..Default::default()
        };
        assert_eq!("BJS0-D134-018", consumer.host());

        let consumer = ConsumerZnode {
            id: "DC-243001184@192.168.10.134:33f3a781-1dd5-488d-84fa-f8d3febce170".to_string(),
            ..Default::default()
        };
        assert_eq!("192.168.10.134", consumer.client_real_ip());
    }

    #[test]
    fn test_consumer_znode_decode() {
        let record = decode_consumer_record(
            "consumerId",
            br#"{"version":1,"subscription":{"wifi_detail_log": 1, "wifi_store_inout_detail_log": 1, "wifi_portal_log": 1},"pattern":"white_list","timestamp":"1473402575029"}"#,
        );
        match record {
            ConsumerIdRecord::Registration(c) => {
                assert_eq!(3, c.subscription.len());
                assert_eq!("white_list", c.pattern);
                assert_eq!(2016, year_of(c.uptime()));
            }
            ConsumerIdRecord::Unknown(_) => panic!("expected a registration record"),
        }
    }

    #[test]
    fn test_consumer_record_unknown_shape() {
        // some SDKs leave a bare topic name under the ids node
        let record = decode_consumer_record("consumerId", b"orders_topic");
        assert!(matches!(record, ConsumerIdRecord::Unknown(_)));

        // numeric timestamp variant still decodes
        let record =
            decode_consumer_record("c1", br#"{"subscription":{"t":1},"timestamp":1473402575029}"#);
        assert!(matches!(record, ConsumerIdRecord::Registration(_)));
    }

    #[test]
    fn test_consumer_id_of_owner() {
        // JVM payload: consumer id + thread number
        assert_eq!(
            "group_host-1447657979158-fa9d1dc8",
            consumer_id_of_owner("group_host-1447657979158-fa9d1dc8-1")
        );
        // bare consumer ids pass through
        assert_eq!("plain-consumer", consumer_id_of_owner("plain-consumer"));
        // four-digit suffix is not a thread number
        assert_eq!(
            "group_host-12345678",
            consumer_id_of_owner("group_host-12345678")
        );
        // non-numeric suffix passes through
        assert_eq!(
            "group_host-deadbeef",
            consumer_id_of_owner("group_host-deadbeef")
        );
    }

    #[test]
    fn test_webhook_round_trip() {
        let hook = WebhookMeta {
            cluster: "trade".to_string(),
            endpoints: vec!["http://localhost:9876".to_string()],
        };
        let decoded = WebhookMeta::decode(&hook.to_bytes()).unwrap();
        assert_eq!(hook, decoded);
    }
}
