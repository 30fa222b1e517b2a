use std::time::Duration;

use async_trait::async_trait;
use corral_zone::Zone;
use metrics::gauge;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::guard_metrics::{BROKERS_DEAD, BROKERS_UNREGISTERED};
use crate::watchers::{Context, Watcher};

pub(crate) fn factory() -> Box<dyn Watcher> {
    Box::new(WatchBrokers {
        zone: None,
        stop: CancellationToken::new(),
        tick: Duration::from_secs(60),
    })
}

/// WatchBrokers monitors aliveness of brokers against each cluster's roster.
pub(crate) struct WatchBrokers {
    zone: Option<Zone>,
    stop: CancellationToken,
    tick: Duration,
}

#[async_trait]
impl Watcher for WatchBrokers {
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
                    info!("kafka.broker stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let (dead, unregistered) = report(&zone).await;
                    gauge!(BROKERS_DEAD.name).set(dead as f64);
                    gauge!(BROKERS_UNREGISTERED.name).set(unregistered as f64);
                }
            }
        }
    }
}

/// Diff live brokers against the roster both ways: rostered-but-dead and
/// live-but-unrostered.
async fn report(zone: &Zone) -> (i64, i64) {
    let mut dead = 0;
    let mut unregistered = 0;

    for cluster in zone.sorted_clusters().await {
        let live = cluster.brokers().await;
        let roster = match cluster.registered_info().await {
            Ok(info) => info.roster,
            Err(err) => {
                warn!(cluster = %cluster.name(), error = %err, "roster read failed");
                continue;
            }
        };

        for broker in live.values() {
            let in_roster = roster
                .iter()
                .any(|b| b.id.to_string() == broker.id && b.addr() == broker.addr());
            if !in_roster {
                unregistered += 1;
            }
        }

        for rostered in &roster {
            let in_live = live
                .values()
                .any(|broker| rostered.id.to_string() == broker.id && broker.addr() == rostered.addr());
            if !in_live {
                dead += 1;
            }
        }
    }

    (dead, unregistered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_ensemble::{EnsembleStorage, MemoryStore};
    use corral_zone::ZoneConfig;

    #[tokio::test]
    async fn test_report_roster_diff() {
        let store = MemoryStore::new();
        let zone = Zone::with_store(
            ZoneConfig::new("test", ""),
            EnsembleStorage::InMemory(store.clone()),
        );
        zone.register_cluster("trade", "/trade").await.unwrap();
        let cluster = zone.cluster("trade").await.unwrap();

        // broker 0 live and rostered, broker 1 rostered only, broker 2 live only
        cluster.register_broker(0, "h0", 9092).await.unwrap();
        cluster.register_broker(1, "h1", 9092).await.unwrap();
        for (id, host) in [(0, "h0"), (2, "h2")] {
            let data = format!(
                r#"{{"jmx_port":-1,"timestamp":"1447157138058","host":"{}","version":1,"port":9092}}"#,
                host
            );
            zone.create_ephemeral(
                &corral_zone::paths::broker_path("/trade", id),
                data.as_bytes(),
            )
            .await
            .unwrap();
        }

        let (dead, unregistered) = report(&zone).await;
        assert_eq!(1, dead);
        assert_eq!(1, unregistered);

        // session loss: every rostered broker counts dead
        store.expire_ephemeral();
        let (dead, unregistered) = report(&zone).await;
        assert_eq!(2, dead);
        assert_eq!(0, unregistered);
    }
}
