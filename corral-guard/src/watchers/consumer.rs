use std::time::Duration;

use async_trait::async_trait;
use corral_zone::Zone;
use metrics::gauge;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::guard_metrics::{CONSUMER_GROUPS_OFFLINE, CONSUMER_GROUPS_ONLINE};
use crate::watchers::{Context, Watcher};

pub(crate) fn factory() -> Box<dyn Watcher> {
    Box::new(WatchConsumers {
        zone: None,
        stop: CancellationToken::new(),
        tick: Duration::from_secs(60),
    })
}

/// WatchConsumers monitors the number of online and offline consumer groups
/// over time. A group is offline when it has registrations left but zero
/// live members.
pub(crate) struct WatchConsumers {
    zone: Option<Zone>,
    stop: CancellationToken,
    tick: Duration,
}

#[async_trait]
impl Watcher for WatchConsumers {
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
                    info!("kafka.consumer stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let (online, offline) = report(&zone).await;
                    gauge!(CONSUMER_GROUPS_ONLINE.name).set(online as f64);
                    gauge!(CONSUMER_GROUPS_OFFLINE.name).set(offline as f64);
                }
            }
        }
    }
}

async fn report(zone: &Zone) -> (i64, i64) {
    let mut online = 0;
    let mut offline = 0;
    for cluster in zone.sorted_clusters().await {
        for members in cluster.consumer_groups().await.values() {
            if members.is_empty() {
                offline += 1;
            } else {
                online += 1;
            }
        }
    }
    (online, offline)
}
