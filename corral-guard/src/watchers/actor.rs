use std::time::Duration;

use async_trait::async_trait;
use corral_zone::Zone;
use metrics::gauge;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::guard_metrics::{ACTORS_REGISTERED, JOB_QUEUES, JOB_QUEUES_ORPHANED};
use crate::watchers::{Context, Watcher};

pub(crate) fn factory() -> Box<dyn Watcher> {
    Box::new(WatchActors {
        zone: None,
        stop: CancellationToken::new(),
        tick: Duration::from_secs(60),
    })
}

/// WatchActors reports the health of the actor/job-queue registries: how
/// many actors are registered and which job queues have no owning claim.
pub(crate) struct WatchActors {
    zone: Option<Zone>,
    stop: CancellationToken,
    tick: Duration,
}

#[async_trait]
impl Watcher for WatchActors {
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
                    info!("pubsub.actor stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let (actors, queues, orphaned) = report(&zone).await;
                    gauge!(ACTORS_REGISTERED.name).set(actors as f64);
                    gauge!(JOB_QUEUES.name).set(queues as f64);
                    gauge!(JOB_QUEUES_ORPHANED.name).set(orphaned as f64);
                }
            }
        }
    }
}

async fn report(zone: &Zone) -> (i64, i64, i64) {
    let orchestrator = zone.orchestrator();

    let actors = orchestrator.actors().await.len() as i64;
    let queues = orchestrator.job_queues().await;
    let mut orphaned = 0;
    for queue in queues.keys() {
        match orchestrator.job_queue_owner(queue).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(queue = %queue, "job queue has no owner");
                orphaned += 1;
            }
            Err(err) => warn!(queue = %queue, error = %err, "owner read failed"),
        }
    }

    (actors, queues.len() as i64, orphaned)
}
