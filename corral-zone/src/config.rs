use std::time::Duration;

/// What to do when an ensemble or decode failure surfaces inside a bulk
/// read: abort the process (interactive operator tooling) or record the
/// error and keep going with empty results (long-running monitors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    Panic,
    #[default]
    Collect,
}

/// Connection settings for one zone: a logical name plus the ensemble it
/// lives on.
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    pub name: String,
    /// Comma-separated `host:port` ensemble address list.
    pub ensemble_addrs: String,
    pub session_timeout: Duration,
    pub error_policy: ErrorPolicy,
}

impl ZoneConfig {
    pub fn new(name: impl Into<String>, ensemble_addrs: impl Into<String>) -> Self {
        ZoneConfig {
            name: name.into(),
            ensemble_addrs: ensemble_addrs.into(),
            session_timeout: Duration::from_secs(30),
            error_policy: ErrorPolicy::default(),
        }
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn addr_list(&self) -> Vec<&str> {
        self.ensemble_addrs.split(',').collect()
    }
}
