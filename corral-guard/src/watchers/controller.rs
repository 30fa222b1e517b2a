use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use corral_zone::meta::{ControllerMeta, ZkTimestamp};
use corral_zone::Zone;
use metrics::gauge;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::guard_metrics::{CONTROLLER_EPOCH_ANOMALY, CONTROLLER_JITTER};
use crate::watchers::{Context, Watcher};

pub(crate) fn factory() -> Box<dyn Watcher> {
    Box::new(WatchControllers {
        zone: None,
        stop: CancellationToken::new(),
        tick: Duration::from_secs(60),
        seen: HashMap::new(),
    })
}

/// WatchControllers reports controller failovers (jitter) and epoch
/// anomalies. The epoch is a generation counter and must never decrease; a
/// changed epoch at an unchanged mtime is equally suspect.
pub(crate) struct WatchControllers {
    zone: Option<Zone>,
    stop: CancellationToken,
    tick: Duration,

    // cluster -> (controller mtime, parsed epoch) from the previous round
    seen: HashMap<String, (ZkTimestamp, Option<i64>)>,
}

#[async_trait]
impl Watcher for WatchControllers {
    fn init(&mut self, ctx: &Context) {
        self.zone = Some(ctx.zone.clone());
        self.stop = ctx.stop.clone();
        if let Some(interval) = ctx.config.poll_interval {
            self.tick = interval;
        }
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
                    info!("kafka.controller stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let controllers = zone.controllers().await;
                    let (jitter, anomalies) = self.report(controllers.into_iter());
                    gauge!(CONTROLLER_JITTER.name).set(jitter as f64);
                    gauge!(CONTROLLER_EPOCH_ANOMALY.name).set(anomalies as f64);
                }
            }
        }
    }
}

impl WatchControllers {
    fn report<I>(&mut self, controllers: I) -> (i64, i64)
    where
        I: Iterator<Item = (String, Option<ControllerMeta>)>,
    {
        let mut jitter = 0;
        let mut anomalies = 0;

        for (cluster, controller) in controllers {
            let Some(controller) = controller else {
                // mid-election; judge again next round
                continue;
            };
            let mtime = controller.mtime;
            let epoch = controller.epoch_value();

            match self.seen.get(&cluster) {
                None => {}
                Some(&(last_mtime, last_epoch)) => {
                    if last_mtime != mtime {
                        warn!(cluster = %cluster, "controller jitter");
                        jitter += 1;
                    }
                    if let (Some(last), Some(current)) = (last_epoch, epoch) {
                        if current < last || (current != last && last_mtime == mtime) {
                            error!(
                                cluster = %cluster,
                                last_epoch = last,
                                epoch = current,
                                "controller epoch anomaly"
                            );
                            anomalies += 1;
                        }
                    }
                }
            }
            self.seen.insert(cluster, (mtime, epoch));
        }

        (jitter, anomalies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher() -> WatchControllers {
        WatchControllers {
            zone: None,
            stop: CancellationToken::new(),
            tick: Duration::from_secs(60),
            seen: HashMap::new(),
        }
    }

    fn controller(mtime_ms: i64, epoch: &str) -> Option<ControllerMeta> {
        Some(ControllerMeta {
            broker: None,
            mtime: ZkTimestamp(mtime_ms),
            epoch: epoch.to_string(),
        })
    }

    #[test]
    fn test_jitter_on_mtime_change() {
        let mut w = watcher();
        let (jitter, _) = w.report(vec![("c1".to_string(), controller(1_000, "5"))].into_iter());
        assert_eq!(0, jitter, "first sighting is baseline, not jitter");

        let (jitter, anomalies) =
            w.report(vec![("c1".to_string(), controller(1_000, "5"))].into_iter());
        assert_eq!((0, 0), (jitter, anomalies));

        // failover: new mtime, advanced epoch - jitter but no anomaly
        let (jitter, anomalies) =
            w.report(vec![("c1".to_string(), controller(2_000, "6"))].into_iter());
        assert_eq!(1, jitter);
        assert_eq!(0, anomalies);
    }

    #[test]
    fn test_epoch_anomalies() {
        let mut w = watcher();
        w.report(vec![("c1".to_string(), controller(1_000, "5"))].into_iter());

        // decreasing epoch is an anomaly
        let (_, anomalies) = w.report(vec![("c1".to_string(), controller(2_000, "4"))].into_iter());
        assert_eq!(1, anomalies);

        // epoch changed while mtime did not: also an anomaly
        let (_, anomalies) = w.report(vec![("c1".to_string(), controller(2_000, "7"))].into_iter());
        assert_eq!(1, anomalies);
    }

    #[test]
    fn test_absent_controller_skipped() {
        let mut w = watcher();
        let (jitter, anomalies) = w.report(vec![("c1".to_string(), None)].into_iter());
        assert_eq!((0, 0), (jitter, anomalies));
    }
}
