use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::errors::{EnsembleError, Result};
use crate::store::{parent_path, EnsembleStore, NodeData, NodeMode, NodeStat};
use crate::watch::{watch_channel, ChildrenWatch};

#[derive(Debug, Clone)]
struct MemNode {
    data: Vec<u8>,
    mode: NodeMode,
    ctime_ms: i64,
    mtime_ms: i64,
    version: i32,
}

/// MemoryStore keeps a full node tree in process memory: parent checks,
/// persistent vs ephemeral node kinds, stats and children watches behave like
/// the real ensemble. SHOULD BE USED ONLY FOR TESTING PURPOSES.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    nodes: Arc<DashMap<String, MemNode>>,
    // parent path -> change ping; watch tasks recompute the child list on ping
    watchers: Arc<DashMap<String, broadcast::Sender<()>>>,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn validate(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
        return Err(EnsembleError::InvalidPath(path.to_string()));
    }
    Ok(())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn node_exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let mut children = BTreeSet::new();
        for entry in self.nodes.iter() {
            if let Some(rest) = entry.key().strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    children.insert(rest.to_string());
                }
            }
        }
        children.into_iter().collect()
    }

    fn notify(&self, parent: &str) {
        if let Some(tx) = self.watchers.get(parent) {
            let _ = tx.send(());
        }
    }

    /// Drop every ephemeral node, simulating the loss of the session that
    /// created them. Persistent nodes survive.
    pub fn expire_ephemeral(&self) {
        let doomed: Vec<String> = self
            .nodes
            .iter()
            .filter(|e| e.value().mode == NodeMode::Ephemeral)
            .map(|e| e.key().clone())
            .collect();
        for path in doomed {
            self.nodes.remove(&path);
            self.notify(parent_path(&path));
            self.notify(&path);
        }
    }
}

#[async_trait]
impl EnsembleStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<NodeData>> {
        validate(path)?;
        Ok(self.nodes.get(path).map(|node| NodeData {
            data: node.data.clone(),
            stat: NodeStat {
                ctime_ms: node.ctime_ms,
                mtime_ms: node.mtime_ms,
                version: node.version,
                ephemeral: node.mode == NodeMode::Ephemeral,
            },
        }))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        if !self.node_exists(path) {
            return Err(EnsembleError::NoNode(path.to_string()));
        }
        Ok(self.children_of(path))
    }

    async fn create(&self, path: &str, data: &[u8], mode: NodeMode) -> Result<()> {
        validate(path)?;
        let parent = parent_path(path);
        if !self.node_exists(parent) {
            return Err(EnsembleError::NoNode(parent.to_string()));
        }
        if self.nodes.contains_key(path) {
            return Err(EnsembleError::NodeExists(path.to_string()));
        }
        let now = now_ms();
        self.nodes.insert(
            path.to_string(),
            MemNode {
                data: data.to_vec(),
                mode,
                ctime_ms: now,
                mtime_ms: now,
                version: 0,
            },
        );
        self.notify(parent);
        Ok(())
    }

    async fn set(&self, path: &str, data: &[u8]) -> Result<()> {
        validate(path)?;
        match self.nodes.get_mut(path) {
            Some(mut node) => {
                node.data = data.to_vec();
                node.mtime_ms = now_ms();
                node.version += 1;
                Ok(())
            }
            None => Err(EnsembleError::NoNode(path.to_string())),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate(path)?;
        match self.nodes.remove(path) {
            Some(_) => {
                self.notify(parent_path(path));
                // wake watchers of the node itself so they observe removal
                self.notify(path);
                Ok(())
            }
            None => Err(EnsembleError::NoNode(path.to_string())),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.node_exists(path))
    }

    async fn watch_children(&self, path: &str) -> Result<ChildrenWatch> {
        if !self.node_exists(path) {
            return Err(EnsembleError::NoNode(path.to_string()));
        }
        let mut pings = self
            .watchers
            .entry(path.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe();

        let (tx, watch) = watch_channel();
        let store = self.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            loop {
                match pings.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
                if !store.node_exists(&path) {
                    // watched node gone: end the subscription, no re-arm
                    return;
                }
                if tx.send(store.children_of(&path)).is_err() {
                    return;
                }
            }
        });
        Ok(watch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests basic node lifecycle: create, get, set, delete
    /// Purpose: Validates core tree semantics with valid paths
    /// Expected: parent checks enforced, stats/versions maintained
    #[tokio::test]
    async fn test_create_get_set_delete() -> Result<()> {
        let store = MemoryStore::new();

        store.create("/clusters", b"", NodeMode::Persistent).await?;
        store
            .create("/clusters/trade", b"/kafka_trade", NodeMode::Persistent)
            .await?;

        let node = store.get("/clusters/trade").await?.expect("node exists");
        assert_eq!(node.data, b"/kafka_trade");
        assert_eq!(node.stat.version, 0);
        assert!(!node.stat.ephemeral);

        store.set("/clusters/trade", b"/kafka_trade2").await?;
        let node = store.get("/clusters/trade").await?.expect("node exists");
        assert_eq!(node.data, b"/kafka_trade2");
        assert_eq!(node.stat.version, 1);

        store.delete("/clusters/trade").await?;
        assert!(store.get("/clusters/trade").await?.is_none());
        Ok(())
    }

    /// Tests parent and duplicate constraints
    /// Expected: create under a missing parent fails with NoNode, duplicate
    /// create fails with NodeExists
    #[tokio::test]
    async fn test_create_constraints() -> Result<()> {
        let store = MemoryStore::new();

        let err = store
            .create("/a/b", b"", NodeMode::Persistent)
            .await
            .unwrap_err();
        assert!(err.is_no_node());

        store.create("/a", b"", NodeMode::Persistent).await?;
        store.create("/a/b", b"", NodeMode::Persistent).await?;
        let err = store
            .create("/a/b", b"", NodeMode::Persistent)
            .await
            .unwrap_err();
        assert!(err.is_node_exists());
        Ok(())
    }

    /// Tests child enumeration
    /// Expected: direct children only, sorted; missing parent is NoNode
    #[tokio::test]
    async fn test_get_children() -> Result<()> {
        let store = MemoryStore::new();
        store.create("/brokers", b"", NodeMode::Persistent).await?;
        store
            .create("/brokers/ids", b"", NodeMode::Persistent)
            .await?;
        store
            .create("/brokers/ids/2", b"{}", NodeMode::Ephemeral)
            .await?;
        store
            .create("/brokers/ids/1", b"{}", NodeMode::Ephemeral)
            .await?;

        assert_eq!(store.get_children("/brokers/ids").await?, vec!["1", "2"]);
        assert_eq!(store.get_children("/brokers").await?, vec!["ids"]);
        assert!(store
            .get_children("/consumers")
            .await
            .unwrap_err()
            .is_no_node());
        Ok(())
    }

    /// Tests ephemeral expiry simulation
    /// Expected: ephemeral nodes vanish, persistent nodes survive
    #[tokio::test]
    async fn test_expire_ephemeral() -> Result<()> {
        let store = MemoryStore::new();
        store.create("/brokers", b"", NodeMode::Persistent).await?;
        store
            .create("/brokers/ids", b"", NodeMode::Persistent)
            .await?;
        store
            .create("/brokers/ids/1", b"{}", NodeMode::Ephemeral)
            .await?;

        store.expire_ephemeral();

        assert!(store.get("/brokers/ids/1").await?.is_none());
        assert!(store.exists("/brokers/ids").await?);
        Ok(())
    }

    /// Tests the children watch delivery contract
    /// Expected: a snapshot arrives after every change; after the node is
    /// deleted the stream closes
    #[tokio::test]
    async fn test_watch_children() -> Result<()> {
        let store = MemoryStore::new();
        store.create("/actors", b"", NodeMode::Persistent).await?;

        let mut watch = store.watch_children("/actors").await?;
        store
            .create("/actors/a1", b"", NodeMode::Ephemeral)
            .await?;
        assert_eq!(watch.changed().await?, vec!["a1"]);

        store
            .create("/actors/a2", b"", NodeMode::Ephemeral)
            .await?;
        assert_eq!(watch.changed().await?, vec!["a1", "a2"]);

        store.delete("/actors/a1").await?;
        store.delete("/actors/a2").await?;
        store.delete("/actors").await?;
        // drain remaining snapshots until the channel closes
        loop {
            match watch.changed().await {
                Ok(_) => continue,
                Err(EnsembleError::WatchChannelClosed) => break,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        Ok(())
    }
}
