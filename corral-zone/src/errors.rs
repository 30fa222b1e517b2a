use corral_ensemble::EnsembleError;
use thiserror::Error;

use crate::kafka::BrokerApiError;

pub type Result<T> = std::result::Result<T, ZoneError>;

#[derive(Error, Debug)]
pub enum ZoneError {
    #[error(transparent)]
    Ensemble(#[from] EnsembleError),

    #[error("cluster already registered: {0}")]
    ClusterExists(String),

    #[error("unknown cluster: {0}")]
    UnknownCluster(String),

    /// The resource is held by a different actor. Never fatal: callers
    /// decide whether to back off or steal.
    #[error("resource {resource} claimed by another actor: {owner}")]
    ClaimedByOthers { resource: String, owner: String },

    /// Release attempted by an actor that does not hold the claim.
    #[error("resource {resource} not claimed by actor {actor}")]
    NotClaimed { resource: String, actor: String },

    #[error("cluster {0} has no live brokers")]
    NoLiveBrokers(String),

    #[error(transparent)]
    Broker(#[from] BrokerApiError),

    #[error("malformed znode payload at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl ZoneError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ZoneError::ClaimedByOthers { .. } | ZoneError::NotClaimed { .. }
        )
    }
}
