use std::time::Duration;

use async_trait::async_trait;
use corral_zone::kafka::{BrokerApi, KafkaApi};
use corral_zone::{Cluster, Zone};
use metrics::gauge;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::guard_metrics::{PARTITIONS_BAD_REPLICA, PARTITIONS_DEAD, PARTITIONS_OUT_OF_SYNC};
use crate::watchers::{Context, Watcher};

pub(crate) fn factory() -> Box<dyn Watcher> {
    Box::new(WatchReplicas {
        zone: None,
        stop: CancellationToken::new(),
        tick: Duration::from_secs(60),
    })
}

/// WatchReplicas reports partitions that are dead, out of sync, or whose
/// replica state cannot be read. The replica list comes from the broker
/// protocol and the ISR from znodes; neither is assumed to match the other.
pub(crate) struct WatchReplicas {
    zone: Option<Zone>,
    stop: CancellationToken,
    tick: Duration,
}

#[async_trait]
impl Watcher for WatchReplicas {
    fn init(&mut self, ctx: &Context) {
        self.zone = Some(ctx.zone.clone());
        self.stop = ctx.stop.clone();
        if let Some(interval) = ctx.config.poll_interval {
            self.tick = interval;
        }
    }

    async fn run(self: Box<Self>) {
        let Some(zone) = self.zone.clone() else {
            return;
        };
        let stop = self.stop.clone();
        let mut ticker = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!("kafka.replica stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let (dead, out_of_sync, bad) = report(&zone).await;
                    gauge!(PARTITIONS_DEAD.name).set(dead as f64);
                    gauge!(PARTITIONS_OUT_OF_SYNC.name).set(out_of_sync as f64);
                    gauge!(PARTITIONS_BAD_REPLICA.name).set(bad as f64);
                }
            }
        }
    }
}

async fn report(zone: &Zone) -> (i64, i64, i64) {
    let mut dead = 0;
    let mut out_of_sync = 0;
    let mut bad_replicas = 0;

    for cluster in zone.sorted_clusters().await {
        let broker_list = cluster.broker_list().await;
        if broker_list.is_empty() {
            warn!(cluster = %cluster.name(), "empty brokers");
            continue;
        }
        let api = match KafkaApi::connect(&broker_list) {
            Ok(api) => api,
            Err(err) => {
                error!(cluster = %cluster.name(), error = %err, "broker connect failed");
                continue;
            }
        };

        let (d, o, b) = report_cluster(&cluster, &api).await;
        dead += d;
        out_of_sync += o;
        bad_replicas += b;
    }

    (dead, out_of_sync, bad_replicas)
}

async fn report_cluster(cluster: &Cluster, api: &dyn BrokerApi) -> (i64, i64, i64) {
    let mut dead = 0;
    let mut out_of_sync = 0;
    let mut bad_replicas = 0;

    let topics = match api.topics().await {
        Ok(topics) => topics,
        Err(err) => {
            error!(cluster = %cluster.name(), error = %err, "topic listing failed");
            return (0, 0, 0);
        }
    };

    for topic in topics {
        let partitions = match api.partitions(&topic).await {
            Ok(partitions) => partitions,
            Err(err) => {
                error!(cluster = %cluster.name(), topic = %topic, error = %err, "partition metadata failed");
                continue;
            }
        };
        let writable = match api.writable_partitions(&topic).await {
            Ok(writable) => writable,
            Err(err) => {
                error!(cluster = %cluster.name(), topic = %topic, error = %err, "writable partitions failed");
                continue;
            }
        };

        if writable.len() != partitions.len() {
            // some partitions are leaderless
            dead += 1;
        }

        for partition in writable {
            let replicas = match api.replicas(&topic, partition).await {
                Ok(replicas) => replicas,
                Err(err) => {
                    error!(
                        cluster = %cluster.name(),
                        topic = %topic,
                        partition = partition,
                        error = %err,
                        "replica fetch failed"
                    );
                    bad_replicas += 1;
                    continue;
                }
            };

            // a failed state read reads as an empty ISR
            let isr = match cluster.isr(&topic, partition).await {
                Ok((isr, _mtime, _ctime)) => isr,
                Err(_) => Vec::new(),
            };
            if isr.len() != replicas.len() {
                out_of_sync += 1;
            }
        }
    }

    (dead, out_of_sync, bad_replicas)
}
