use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// configuration settings loaded from the config file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LoadConfiguration {
    /// Zone this guard watches
    pub(crate) zone: ZoneNode,
    /// Guard runtime knobs
    #[serde(default)]
    pub(crate) guard: Option<GuardNode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ZoneNode {
    /// Logical zone name
    pub(crate) name: String,
    /// Comma-separated ensemble host:port list
    pub(crate) ensemble_addrs: String,
    /// Session timeout in milliseconds (defaults to 30s)
    pub(crate) session_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct GuardNode {
    /// Prometheus exporter listen address
    pub(crate) prom_exporter: Option<String>,
    /// Root znode of the guard leader claim
    pub(crate) leader_root: Option<String>,
    /// Candidate id published with the leader claim
    pub(crate) id: Option<String>,
    /// Override the watchers' polling interval (seconds)
    pub(crate) poll_interval_secs: Option<u64>,
}

/// configuration settings for the guard service, derived from
/// LoadConfiguration with overrides applied on top
#[derive(Debug)]
pub(crate) struct GuardConfiguration {
    pub(crate) zone_name: String,
    pub(crate) ensemble_addrs: String,
    pub(crate) session_timeout: Duration,
    pub(crate) prom_exporter: Option<SocketAddr>,
    pub(crate) leader_root: String,
    pub(crate) guard_id: String,
    pub(crate) poll_interval: Option<Duration>,
}

impl TryFrom<LoadConfiguration> for GuardConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        let guard = config.guard.unwrap_or_default();

        let prom_exporter: Option<SocketAddr> = match guard.prom_exporter {
            Some(addr) => Some(
                addr.parse()
                    .context(format!("failed to parse prom_exporter address: {}", addr))?,
            ),
            None => None,
        };

        Ok(GuardConfiguration {
            zone_name: config.zone.name,
            ensemble_addrs: config.zone.ensemble_addrs,
            session_timeout: Duration::from_millis(config.zone.session_timeout_ms.unwrap_or(30_000)),
            prom_exporter,
            leader_root: guard.leader_root.unwrap_or_else(|| "/_guard".to_string()),
            guard_id: guard
                .id
                .unwrap_or_else(|| format!("guard-{}", std::process::id())),
            poll_interval: guard.poll_interval_secs.map(Duration::from_secs),
        })
    }
}
