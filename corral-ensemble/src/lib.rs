mod errors;
pub use errors::{EnsembleError, Result};

mod store;
pub use store::{EnsembleStore, NodeData, NodeMode, NodeStat};

mod watch;
pub use watch::{ChildrenWatch, WATCH_QUEUE_DEPTH};

mod providers;
pub use providers::{in_memory::MemoryStore, zookeeper::ZooKeeperStore};

use async_trait::async_trait;

/// The configured ensemble backend for a zone.
#[derive(Debug, Clone)]
pub enum EnsembleStorage {
    ZooKeeper(ZooKeeperStore),
    InMemory(MemoryStore), // InMemory is used for testing purposes
}

#[async_trait]
impl EnsembleStore for EnsembleStorage {
    async fn get(&self, path: &str) -> Result<Option<NodeData>> {
        match self {
            EnsembleStorage::ZooKeeper(store) => store.get(path).await,
            EnsembleStorage::InMemory(store) => store.get(path).await,
        }
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        match self {
            EnsembleStorage::ZooKeeper(store) => store.get_children(path).await,
            EnsembleStorage::InMemory(store) => store.get_children(path).await,
        }
    }

    async fn create(&self, path: &str, data: &[u8], mode: NodeMode) -> Result<()> {
        match self {
            EnsembleStorage::ZooKeeper(store) => store.create(path, data, mode).await,
            EnsembleStorage::InMemory(store) => store.create(path, data, mode).await,
        }
    }

    async fn set(&self, path: &str, data: &[u8]) -> Result<()> {
        match self {
            EnsembleStorage::ZooKeeper(store) => store.set(path, data).await,
            EnsembleStorage::InMemory(store) => store.set(path, data).await,
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self {
            EnsembleStorage::ZooKeeper(store) => store.delete(path).await,
            EnsembleStorage::InMemory(store) => store.delete(path).await,
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self {
            EnsembleStorage::ZooKeeper(store) => store.exists(path).await,
            EnsembleStorage::InMemory(store) => store.exists(path).await,
        }
    }

    async fn watch_children(&self, path: &str) -> Result<ChildrenWatch> {
        match self {
            EnsembleStorage::ZooKeeper(store) => store.watch_children(path).await,
            EnsembleStorage::InMemory(store) => store.watch_children(path).await,
        }
    }
}
