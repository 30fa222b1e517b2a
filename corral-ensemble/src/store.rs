use async_trait::async_trait;

use crate::errors::Result;
use crate::watch::ChildrenWatch;

/// Node kind: a persistent node survives the creator's session, an ephemeral
/// node vanishes with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMode {
    Persistent,
    Ephemeral,
}

/// Subset of the ensemble's stat structure that the metadata layer consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStat {
    /// Creation time, epoch milliseconds.
    pub ctime_ms: i64,
    /// Last modification time, epoch milliseconds.
    pub mtime_ms: i64,
    /// Data version, bumped on every set.
    pub version: i32,
    pub ephemeral: bool,
}

/// Raw bytes of a node together with its stat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeData {
    pub data: Vec<u8>,
    pub stat: NodeStat,
}

impl NodeData {
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

#[async_trait]
pub trait EnsembleStore: Send + Sync + 'static {
    /// Read one node. A missing node is `Ok(None)`; callers that expect the
    /// node to exist turn that into an error at their own layer.
    async fn get(&self, path: &str) -> Result<Option<NodeData>>;

    /// Child names of `path`. A missing parent is `Err(NoNode)`.
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    /// Create a node. Fails with `NodeExists` when taken and `NoNode` when
    /// the parent is missing.
    async fn create(&self, path: &str, data: &[u8], mode: NodeMode) -> Result<()>;

    /// Overwrite the data of an existing node.
    async fn set(&self, path: &str, data: &[u8]) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Subscribe to children changes of `path`. The returned stream yields a
    /// fresh child-name list after every change; see [`ChildrenWatch`] for
    /// the delivery contract.
    async fn watch_children(&self, path: &str) -> Result<ChildrenWatch>;
}

/// Parent path of `path`, with `/` as the top.
pub(crate) fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

#[cfg(test)]
mod tests {
    use super::parent_path;

    #[test]
    fn test_parent_path() {
        assert_eq!("/", parent_path("/brokers"));
        assert_eq!("/brokers", parent_path("/brokers/ids"));
        assert_eq!("/brokers/ids", parent_path("/brokers/ids/0"));
    }
}
