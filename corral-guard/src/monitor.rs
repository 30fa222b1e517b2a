use std::sync::Arc;

use corral_zone::Zone;
use metrics::gauge;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::guard_metrics::LEADER_STATE;
use crate::leader_election::{LeaderElection, LeaderState};
use crate::service_configuration::GuardConfiguration;
use crate::watchers::{Context, WatcherFactory};

/// The engine that starts and stops the watcher set as leadership comes and
/// goes. Only the elected leader polls; every election win builds a fresh
/// set of watcher instances so no state leaks across Stop -> Start cycles.
pub(crate) struct Monitor {
    zone: Zone,
    config: Arc<GuardConfiguration>,
    factories: Vec<(&'static str, WatcherFactory)>,

    stop: Option<CancellationToken>,
    inflight: TaskTracker,
    leading: bool,
}

impl Monitor {
    pub(crate) fn new(
        zone: Zone,
        config: Arc<GuardConfiguration>,
        factories: Vec<(&'static str, WatcherFactory)>,
    ) -> Self {
        Monitor {
            zone,
            config,
            factories,
            stop: None,
            inflight: TaskTracker::new(),
            leading: false,
        }
    }

    /// Build fresh watcher instances and spawn them.
    fn start(&mut self) {
        self.leading = true;
        gauge!(LEADER_STATE.name).set(1.0);

        let stop = CancellationToken::new();
        let tracker = TaskTracker::new();
        for (name, factory) in &self.factories {
            let mut watcher = factory();
            let ctx = Context {
                zone: self.zone.clone(),
                stop: stop.clone(),
                config: Arc::clone(&self.config),
            };
            watcher.init(&ctx);
            info!(watcher = name, "created and starting watcher");
            tracker.spawn(watcher.run());
        }
        tracker.close();

        self.stop = Some(stop);
        self.inflight = tracker;
        info!("all watchers ready");
    }

    /// Broadcast the stop signal and block until every watcher has drained.
    /// Cancellation is cooperative only: each watcher observes the signal at
    /// its next suspension point.
    async fn stop_watchers(&mut self) {
        if !self.leading {
            return;
        }
        self.leading = false;
        gauge!(LEADER_STATE.name).set(0.0);

        info!("stopping all watchers ...");
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
        self.inflight.wait().await;
        info!("all watchers stopped");
    }

    /// Campaign for leadership and run the watcher set while leading; exits
    /// on interrupt.
    pub(crate) async fn serve(&mut self) -> anyhow::Result<()> {
        let election = LeaderElection::new(
            self.zone.clone(),
            &self.config.leader_root,
            &self.config.guard_id,
        );
        let mut state_rx = election.subscribe();
        let election_stop = CancellationToken::new();
        let election_task = tokio::spawn(election.campaign(election_stop.clone()));

        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        error!("election task ended unexpectedly");
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    match state {
                        LeaderState::Leading if !self.leading => {
                            info!("won the election, starting all watchers");
                            self.start();
                        }
                        LeaderState::Following | LeaderState::NoLeader if self.leading => {
                            warn!("lost the election, watching for the next term");
                            self.stop_watchers().await;
                        }
                        _ => {}
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received interrupt");
                    break;
                }
            }
        }

        self.stop_watchers().await;
        election_stop.cancel();
        let _ = election_task.await;
        info!("guard bye");
        Ok(())
    }
}
