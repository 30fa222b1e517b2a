use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use corral_zone::kafka::KafkaApi;
use corral_zone::meta::{ConsumerMeta, ConsumerZnode};
use corral_zone::Zone;
use metrics::gauge;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::guard_metrics::{SUB_CONFLICT_GROUPS, SUB_LAG_GROUPS};
use crate::watchers::{Context, Watcher};

#[cfg(test)]
#[path = "sub_tests.rs"]
mod sub_tests;

/// Consumers younger than this are too new to judge.
const MIN_UPTIME: Duration = Duration::from_secs(2 * 60);
/// Offsets are committed on a cycle; a commit this recent is not lag.
const COMMIT_GRACE: Duration = Duration::from_secs(3 * 60);

pub(crate) fn factory() -> Box<dyn Watcher> {
    Box::new(WatchSub {
        zone: None,
        stop: CancellationToken::new(),
        tick: Duration::from_secs(60),
        suspects: HashMap::new(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct GroupTopicPartition {
    pub group: String,
    pub topic: String,
    pub partition_id: String,
}

/// Offsets recorded when a key first came under suspicion.
#[derive(Debug, Clone, Copy)]
struct SubStatus {
    produced_offset: i64,
    consumed_offset: i64,
    observed_at: SystemTime,
}

/// Outcome of one round of judgement for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LagVerdict {
    /// No resolvable consumer registration.
    Unrecognized,
    /// Consumer uptime below the minimum; cleared and skipped.
    TooYoung,
    /// No lag, or within the commit grace window; cleared.
    Healthy,
    /// First sighting of possible lag; recorded, no alarm.
    Suspected,
    /// Produced offsets advanced while consumed did not: confirmed stuck.
    Criminal,
    /// Still lagging but the consumer moved; no alarm.
    LaggingButAlive,
}

/// WatchSub distinguishes a genuinely stuck consumer from one that is merely
/// lagging momentarily, using two consecutive observations per
/// (group, topic, partition) key, and separately counts groups whose members
/// subscribe to more than one topic.
pub(crate) struct WatchSub {
    zone: Option<Zone>,
    stop: CancellationToken,
    tick: Duration,

    // touched only by this watcher's own polling task; no lock needed
    suspects: HashMap<GroupTopicPartition, SubStatus>,
}

#[async_trait]
impl Watcher for WatchSub {
    fn init(&mut self, ctx: &Context) {
        self.zone = Some(ctx.zone.clone());
        self.stop = ctx.stop.clone();
        if let Some(interval) = ctx.config.poll_interval {
            self.tick = interval;
        }
        self.suspects = HashMap::new();
    }

    async fn run(mut self: Box<Self>) {
        let Some(zone) = self.zone.clone() else {
            return;
        };
        let stop = self.stop.clone();
        let mut ticker = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!("kateway.sub stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let lags = self.sub_lags(&zone).await;
                    let conflicts = sub_conflicts(&zone).await;
                    gauge!(SUB_LAG_GROUPS.name).set(lags as f64);
                    gauge!(SUB_CONFLICT_GROUPS.name).set(conflicts as f64);
                }
            }
        }
    }
}

impl WatchSub {
    async fn sub_lags(&mut self, zone: &Zone) -> i64 {
        let now = SystemTime::now();
        let mut lags = 0;

        for cluster in zone.sorted_clusters().await {
            let broker_list = cluster.broker_list().await;
            if broker_list.is_empty() {
                // no brokers alive, so the lags cannot be told
                continue;
            }
            let api = match KafkaApi::connect(&broker_list) {
                Ok(api) => api,
                Err(err) => {
                    error!(cluster = %cluster.name(), error = %err, "broker connect failed");
                    continue;
                }
            };

            for (_group, consumers) in cluster.consumers_by_group(&api, "").await {
                for meta in &consumers {
                    if !meta.online {
                        continue;
                    }
                    if self.judge(cluster.name(), meta, now) == LagVerdict::Criminal {
                        lags += 1;
                    }
                }
            }
        }

        lags
    }

    /// One round of the suspect state machine for one key. The suspect entry
    /// is retained untouched on both `Criminal` and `LaggingButAlive`:
    /// later rounds are judged against the original sighting, and a consumer
    /// that stays stuck alarms every round.
    pub(crate) fn judge(&mut self, cluster: &str, meta: &ConsumerMeta, now: SystemTime) -> LagVerdict {
        let key = GroupTopicPartition {
            group: meta.group.clone(),
            topic: meta.topic.clone(),
            partition_id: meta.partition_id.clone(),
        };

        let Some(consumer) = &meta.consumer else {
            warn!(
                cluster = %cluster,
                group = %meta.group,
                topic = %meta.topic,
                partition = %meta.partition_id,
                "unrecognized consumer"
            );
            return LagVerdict::Unrecognized;
        };

        let uptime = now.duration_since(consumer.uptime()).unwrap_or_default();
        if uptime < MIN_UPTIME {
            info!(
                cluster = %cluster,
                group = %meta.group,
                topic = %meta.topic,
                partition = %meta.partition_id,
                "group just started"
            );
            self.suspects.remove(&key);
            return LagVerdict::TooYoung;
        }

        let commit_elapsed = now.duration_since(meta.mtime.time()).unwrap_or_default();
        if meta.lag == 0 || commit_elapsed < COMMIT_GRACE {
            self.suspects.remove(&key);
            return LagVerdict::Healthy;
        }

        match self.suspects.get(&key) {
            None => {
                // suspect it; next round decides whether it goes on trial
                warn!(
                    cluster = %cluster,
                    group = %meta.group,
                    topic = %meta.topic,
                    partition = %meta.partition_id,
                    produced = meta.producer_offset,
                    consumed = meta.consumer_offset,
                    lag = meta.lag,
                    commit_elapsed = ?commit_elapsed,
                    "suspected"
                );
                self.suspects.insert(
                    key,
                    SubStatus {
                        produced_offset: meta.producer_offset,
                        consumed_offset: meta.consumer_offset,
                        observed_at: now,
                    },
                );
                LagVerdict::Suspected
            }
            Some(last) => {
                if last.produced_offset < meta.producer_offset
                    && last.consumed_offset >= meta.consumer_offset
                {
                    // new messages were produced during the period but the
                    // consumer did not move ahead
                    let suspected_for = now.duration_since(last.observed_at).unwrap_or_default();
                    error!(
                        cluster = %cluster,
                        group = %meta.group,
                        topic = %meta.topic,
                        partition = %meta.partition_id,
                        produced = meta.producer_offset,
                        consumed = meta.consumer_offset,
                        lag = meta.lag,
                        commit_elapsed = ?commit_elapsed,
                        suspected_for = ?suspected_for,
                        "confirmed stuck consumer"
                    );
                    LagVerdict::Criminal
                } else {
                    warn!(
                        cluster = %cluster,
                        group = %meta.group,
                        topic = %meta.topic,
                        partition = %meta.partition_id,
                        produced = meta.producer_offset,
                        consumed = meta.consumer_offset,
                        lag = meta.lag,
                        "lagging but still alive"
                    );
                    LagVerdict::LaggingButAlive
                }
            }
        }
    }
}

/// Count groups whose members' subscriptions union to more than one topic.
/// Stateless: every round scans from scratch.
pub(crate) fn conflicts_in(groups: &BTreeMap<String, BTreeMap<String, ConsumerZnode>>) -> i64 {
    let mut conflicts = 0;
    for (group, members) in groups {
        if members.is_empty() {
            continue;
        }
        let mut topics: Vec<&String> = members
            .values()
            .flat_map(|c| c.subscription.keys())
            .collect();
        topics.sort();
        topics.dedup();
        if topics.len() > 1 {
            conflicts += 1;
            warn!(
                group = %group,
                topics = %topics
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                "group consuming more than 1 topics"
            );
        }
    }
    conflicts
}

async fn sub_conflicts(zone: &Zone) -> i64 {
    let mut conflicts = 0;
    for cluster in zone.sorted_clusters().await {
        conflicts += conflicts_in(&cluster.consumer_groups().await);
    }
    conflicts
}
