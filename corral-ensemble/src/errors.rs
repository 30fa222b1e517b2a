use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnsembleError>;

#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("ensemble unreachable: {0}")]
    Connection(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node does not exist: {0}")]
    NoNode(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("watch channel closed")]
    WatchChannelClosed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation not supported by backend")]
    Unsupported,

    #[error("backend error: {0}")]
    Backend(String),
}

impl EnsembleError {
    /// True when the error means "the node is not there", as opposed to a
    /// transport or backend failure.
    pub fn is_no_node(&self) -> bool {
        matches!(self, EnsembleError::NoNode(_))
    }

    pub fn is_node_exists(&self) -> bool {
        matches!(self, EnsembleError::NodeExists(_))
    }
}
