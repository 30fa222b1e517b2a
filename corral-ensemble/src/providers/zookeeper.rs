use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use zookeeper_client as zk;

use crate::errors::{EnsembleError, Result};
use crate::store::{EnsembleStore, NodeData, NodeMode, NodeStat};
use crate::watch::{watch_channel, ChildrenWatch};

/// ZooKeeperStore holds one client session per zone. The underlying client
/// serializes wire traffic internally, so the handle is safe to share across
/// tasks.
#[derive(Clone)]
pub struct ZooKeeperStore {
    client: zk::Client,
}

impl std::fmt::Debug for ZooKeeperStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZooKeeperStore").finish_non_exhaustive()
    }
}

fn map_err(path: &str, err: zk::Error) -> EnsembleError {
    match err {
        zk::Error::NodeExists => EnsembleError::NodeExists(path.to_string()),
        zk::Error::NoNode => EnsembleError::NoNode(path.to_string()),
        other => EnsembleError::Backend(format!("{}: {}", path, other)),
    }
}

fn node_stat(stat: &zk::Stat) -> NodeStat {
    NodeStat {
        ctime_ms: stat.ctime,
        mtime_ms: stat.mtime,
        version: stat.version,
        ephemeral: stat.ephemeral_owner != 0,
    }
}

impl ZooKeeperStore {
    /// Establish the session. The client handles server failover within the
    /// address list on its own once connected.
    pub async fn connect(addrs: &str, session_timeout: Duration) -> Result<Self> {
        let client = zk::Client::connector()
            .session_timeout(session_timeout)
            .connect(addrs)
            .await
            .map_err(|e| EnsembleError::Connection(format!("{}: {}", addrs, e)))?;
        Ok(ZooKeeperStore { client })
    }
}

#[async_trait]
impl EnsembleStore for ZooKeeperStore {
    async fn get(&self, path: &str) -> Result<Option<NodeData>> {
        match self.client.get_data(path).await {
            Ok((data, stat)) => Ok(Some(NodeData {
                data,
                stat: node_stat(&stat),
            })),
            Err(zk::Error::NoNode) => Ok(None),
            Err(err) => Err(map_err(path, err)),
        }
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let mut children = self
            .client
            .list_children(path)
            .await
            .map_err(|e| map_err(path, e))?;
        children.sort();
        Ok(children)
    }

    async fn create(&self, path: &str, data: &[u8], mode: NodeMode) -> Result<()> {
        let create_mode = match mode {
            NodeMode::Persistent => zk::CreateMode::Persistent,
            NodeMode::Ephemeral => zk::CreateMode::Ephemeral,
        };
        let options = create_mode.with_acls(zk::Acls::anyone_all());
        let _ = self
            .client
            .create(path, data, &options)
            .await
            .map_err(|e| map_err(path, e))?;
        Ok(())
    }

    async fn set(&self, path: &str, data: &[u8]) -> Result<()> {
        let _ = self
            .client
            .set_data(path, data, None)
            .await
            .map_err(|e| map_err(path, e))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete(path, None)
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.client.check_stat(path).await {
            Ok(stat) => Ok(stat.is_some()),
            Err(err) => Err(map_err(path, err)),
        }
    }

    async fn watch_children(&self, path: &str) -> Result<ChildrenWatch> {
        // arm the first one-shot watch up front so a missing node surfaces
        // synchronously as NoNode
        let (_, watcher) = self
            .client
            .list_and_watch_children(path)
            .await
            .map_err(|e| map_err(path, e))?;

        let (tx, watch) = watch_channel();
        let client = self.client.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            let mut watcher = watcher;
            loop {
                let event = watcher.changed().await;
                if event.event_type == zk::EventType::NodeDeleted {
                    debug!(path = %path, "watched node deleted, children watch ends");
                    return;
                }
                // re-arm and push the fresh child list; on session loss or a
                // vanished node the subscription simply ends; callers detect
                // the closed stream and reconnect
                match client.list_and_watch_children(&path).await {
                    Ok((children, next)) => {
                        watcher = next;
                        let mut children = children;
                        children.sort();
                        if tx.send(children).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        debug!(path = %path, error = %err, "children watch ends");
                        return;
                    }
                }
            }
        });
        Ok(watch)
    }
}
