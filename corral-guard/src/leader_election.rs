use std::time::Duration;

use corral_zone::{Zone, ZoneError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LEADER_RESOURCE: &str = "leader";
const CHECK_INTERVAL: Duration = Duration::from_secs(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeaderState {
    NoLeader,
    Leading,
    Following,
}

/// Ensemble-backed leader election over a fixed path: the leader is whoever
/// holds the ephemeral claim under `<root>/leader`. Candidates re-check
/// periodically; losing the session releases the claim and hands leadership
/// over.
pub(crate) struct LeaderElection {
    zone: Zone,
    root: String,
    id: String,
    interval: Duration,
    tx: watch::Sender<LeaderState>,
}

impl LeaderElection {
    pub(crate) fn new(zone: Zone, root: &str, id: &str) -> Self {
        let (tx, _) = watch::channel(LeaderState::NoLeader);
        LeaderElection {
            zone,
            root: root.to_string(),
            id: id.to_string(),
            interval: CHECK_INTERVAL,
            tx,
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LeaderState> {
        self.tx.subscribe()
    }

    /// Run for election until `stop` fires, publishing state transitions to
    /// subscribers. Resigns the claim on the way out.
    pub(crate) async fn campaign(self, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    self.resign().await;
                    info!("election stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let state = self.check().await;
                    self.tx.send_if_modified(|current| {
                        if *current != state {
                            *current = state;
                            true
                        } else {
                            false
                        }
                    });
                }
            }
        }
    }

    pub(crate) async fn check(&self) -> LeaderState {
        match self
            .zone
            .orchestrator()
            .claim_resource(&self.id, &self.root, LEADER_RESOURCE)
            .await
        {
            Ok(()) => LeaderState::Leading,
            Err(ZoneError::ClaimedByOthers { owner, .. }) => {
                debug!(leader = %owner, "following");
                LeaderState::Following
            }
            Err(err) => {
                warn!(error = %err, "election check failed");
                LeaderState::NoLeader
            }
        }
    }

    pub(crate) async fn resign(&self) {
        if let Err(err) = self
            .zone
            .orchestrator()
            .release_resource(&self.id, &self.root, LEADER_RESOURCE)
            .await
        {
            if !err.is_conflict() {
                warn!(error = %err, "failed to release leader claim");
            }
        }
    }
}
