use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use corral_ensemble::{
    ChildrenWatch, EnsembleStorage, EnsembleStore, NodeData, NodeMode, ZooKeeperStore,
};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::cluster::Cluster;
use crate::config::{ErrorPolicy, ZoneConfig};
use crate::errors::{Result, ZoneError};
use crate::meta::{BrokerZnode, ControllerMeta};
use crate::orchestrator::Orchestrator;
use crate::paths;

const CONNECT_RETRIES: u64 = 3;
const CONNECT_BACKOFF_MS: u64 = 200;

/// A Zone owns the single session to one coordination ensemble under which
/// many clusters reside, each at its own chroot path.
///
/// The handle is cheap to clone and safe to share across tasks; the
/// underlying client serializes wire traffic internally.
#[derive(Debug, Clone)]
pub struct Zone {
    inner: Arc<ZoneInner>,
}

#[derive(Debug)]
struct ZoneInner {
    config: ZoneConfig,
    store: OnceCell<EnsembleStorage>,
    errors: Mutex<Vec<String>>,
}

impl Zone {
    /// A zone that connects lazily to the configured ensemble.
    pub fn new(config: ZoneConfig) -> Self {
        Zone {
            inner: Arc::new(ZoneInner {
                config,
                store: OnceCell::new(),
                errors: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A zone over a pre-built store. Used with the in-memory provider in
    /// tests and anywhere the backend is constructed by the caller.
    pub fn with_store(config: ZoneConfig, store: EnsembleStorage) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(store);
        Zone {
            inner: Arc::new(ZoneInner {
                config,
                store: cell,
                errors: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ZoneConfig {
        &self.inner.config
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.clone())
    }

    /// Establish the session. Idempotent: a second call keeps the existing
    /// session and only logs. Connection failures are retried
    /// `CONNECT_RETRIES` times with linear backoff; exhausting the retries is
    /// fatal under `ErrorPolicy::Panic` and otherwise recorded, leaving the
    /// zone unconnected (later operations retry lazily).
    pub async fn connect(&self) {
        if self.inner.store.initialized() {
            warn!(zone = %self.name(), "duplicate connect, keeping the existing session");
            return;
        }

        match self.try_connect().await {
            Ok(store) => {
                let _ = self.inner.store.set(store);
            }
            Err(err) => self.swallow("connect", err),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.store.initialized()
    }

    async fn try_connect(&self) -> Result<EnsembleStorage> {
        let config = &self.inner.config;
        let mut last_err = ZoneError::Other("no ensemble address".to_string());
        for attempt in 1..=CONNECT_RETRIES {
            match ZooKeeperStore::connect(&config.ensemble_addrs, config.session_timeout).await {
                Ok(store) => return Ok(EnsembleStorage::ZooKeeper(store)),
                Err(err) => {
                    warn!(
                        zone = %config.name,
                        addrs = %config.ensemble_addrs,
                        attempt,
                        error = %err,
                        "ensemble connect failed"
                    );
                    last_err = err.into();
                }
            }
            if attempt < CONNECT_RETRIES {
                tokio::time::sleep(Duration::from_millis(CONNECT_BACKOFF_MS * attempt)).await;
            }
        }
        Err(last_err)
    }

    pub(crate) async fn store(&self) -> Result<&EnsembleStorage> {
        if self.inner.store.get().is_none() {
            self.connect().await;
        }
        self.inner
            .store
            .get()
            .ok_or_else(|| ZoneError::Other(format!("zone {} not connected", self.name())))
    }

    /// Record or escalate a failure according to the zone's error policy.
    pub(crate) fn swallow(&self, path: &str, err: ZoneError) {
        if self.inner.config.error_policy == ErrorPolicy::Panic {
            panic!("{}: {}", path, err);
        }
        tracing::error!(path = %path, error = %err, "ensemble operation failed");
        self.inner.errors.lock().unwrap().push(err.to_string());
    }

    /// Errors collected so far under `ErrorPolicy::Collect`.
    pub fn errors(&self) -> Vec<String> {
        self.inner.errors.lock().unwrap().clone()
    }

    pub fn reset_errors(&self) {
        self.inner.errors.lock().unwrap().clear();
    }

    pub async fn ping(&self) -> Result<()> {
        let store = self.store().await?;
        store.exists("/").await?;
        Ok(())
    }

    /// Child names under `path`; a missing parent yields an empty list, any
    /// other failure is handled per the error policy.
    pub async fn children(&self, path: &str) -> Vec<String> {
        let store = match self.store().await {
            Ok(store) => store,
            Err(err) => {
                self.swallow(path, err);
                return Vec::new();
            }
        };
        match store.get_children(path).await {
            Ok(children) => children,
            Err(err) if err.is_no_node() => Vec::new(),
            Err(err) => {
                self.swallow(path, err.into());
                Vec::new()
            }
        }
    }

    /// Child name -> node data for every existing child of `path`. A missing
    /// parent yields an empty map; children that vanish between the listing
    /// and the read are skipped.
    pub async fn children_with_data(&self, path: &str) -> BTreeMap<String, NodeData> {
        let mut result = BTreeMap::new();
        let store = match self.store().await {
            Ok(store) => store,
            Err(err) => {
                self.swallow(path, err);
                return result;
            }
        };
        let children = match store.get_children(path).await {
            Ok(children) => children,
            Err(err) if err.is_no_node() => return result,
            Err(err) => {
                self.swallow(path, err.into());
                return result;
            }
        };
        let base = if path == "/" { "" } else { path };
        for name in children {
            let child_path = format!("{}/{}", base, name);
            match store.get(&child_path).await {
                Ok(Some(node)) => {
                    result.insert(name, node);
                }
                Ok(None) => debug!(path = %child_path, "child vanished during read"),
                Err(err) => self.swallow(&child_path, err.into()),
            }
        }
        result
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.store().await?.exists(path).await?)
    }

    /// Create every missing node along `path` as a permanent node.
    pub async fn ensure_path_exists(&self, path: &str) -> Result<()> {
        let store = self.store().await?;
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);
            match store.create(&prefix, b"", NodeMode::Persistent).await {
                Ok(()) => {}
                Err(err) if err.is_node_exists() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn ensure_parent_exists(&self, path: &str) -> Result<()> {
        self.ensure_path_exists(paths::parent_path(path)).await
    }

    pub async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()> {
        self.ensure_parent_exists(path).await?;
        let store = self.store().await?;
        store.create(path, data, NodeMode::Ephemeral).await?;
        Ok(())
    }

    pub async fn create_permanent(&self, path: &str, data: &[u8]) -> Result<()> {
        self.ensure_parent_exists(path).await?;
        let store = self.store().await?;
        store.create(path, data, NodeMode::Persistent).await?;
        Ok(())
    }

    pub async fn set(&self, path: &str, data: &[u8]) -> Result<()> {
        let store = self.store().await?;
        store.set(path, data).await?;
        Ok(())
    }

    /// Create the node, or overwrite it when it already exists.
    pub async fn create_or_set(&self, path: &str, data: &[u8]) -> Result<()> {
        self.ensure_parent_exists(path).await?;
        let store = self.store().await?;
        match store.create(path, data, NodeMode::Persistent).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_node_exists() => {
                store.set(path, data).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let store = self.store().await?;
        store.delete(path).await?;
        Ok(())
    }

    pub async fn delete_recursive(&self, path: &str) -> Result<()> {
        let store = self.store().await?;
        let children = match store.get_children(path).await {
            Ok(children) => children,
            Err(err) if err.is_no_node() => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        for child in children {
            Box::pin(self.delete_recursive(&format!("{}/{}", path, child))).await?;
        }
        store.delete(path).await?;
        Ok(())
    }

    pub async fn watch_children(&self, path: &str) -> Result<ChildrenWatch> {
        Ok(self.store().await?.watch_children(path).await?)
    }

    // ---- cluster registry ----------------------------------------------

    /// Register a cluster's chroot path under the zone-global registry.
    /// Registering a name twice fails; the chroot node itself is seeded and
    /// may already exist.
    pub async fn register_cluster(&self, name: &str, chroot: &str) -> Result<()> {
        let store = self.store().await?;
        match store
            .create(paths::CLUSTER_ROOT, b"", NodeMode::Persistent)
            .await
        {
            Ok(()) | Err(corral_ensemble::EnsembleError::NodeExists(_)) => {}
            Err(err) => return Err(err.into()),
        }

        match store
            .create(
                &paths::cluster_path(name),
                chroot.as_bytes(),
                NodeMode::Persistent,
            )
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_node_exists() => {
                return Err(ZoneError::ClusterExists(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        }

        self.ensure_path_exists(chroot).await
    }

    pub async fn unregister_cluster(&self, name: &str) -> Result<()> {
        let store = self.store().await?;
        match store.delete(&paths::cluster_path(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_no_node() => Err(ZoneError::UnknownCluster(name.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// The full registry: cluster name -> chroot path.
    pub async fn clusters(&self) -> BTreeMap<String, String> {
        self.children_with_data(paths::CLUSTER_ROOT)
            .await
            .into_iter()
            .map(|(name, node)| (name, node.as_str_lossy().into_owned()))
            .collect()
    }

    pub async fn cluster_path_of(&self, name: &str) -> Result<String> {
        let store = self.store().await?;
        match store.get(&paths::cluster_path(name)).await? {
            Some(node) => Ok(node.as_str_lossy().into_owned()),
            None => Err(ZoneError::UnknownCluster(name.to_string())),
        }
    }

    /// A view over one registered cluster.
    pub async fn cluster(&self, name: &str) -> Result<Cluster> {
        let chroot = self.cluster_path_of(name).await?;
        Ok(Cluster::new(self.clone(), name, &chroot))
    }

    /// A view over a cluster at an explicit chroot, registered or not.
    pub fn cluster_with_chroot(&self, name: &str, chroot: &str) -> Cluster {
        Cluster::new(self.clone(), name, chroot)
    }

    /// Views for every registered cluster, sorted by name.
    pub async fn sorted_clusters(&self) -> Vec<Cluster> {
        self.clusters()
            .await
            .into_iter()
            .map(|(name, chroot)| Cluster::new(self.clone(), &name, &chroot))
            .collect()
    }

    /// Registered clusters whose descriptor marks them public.
    pub async fn public_clusters(&self) -> Vec<Cluster> {
        let mut result = Vec::new();
        for cluster in self.sorted_clusters().await {
            match cluster.registered_info().await {
                Ok(info) if info.public => result.push(cluster),
                Ok(_) => {}
                Err(err) => self.swallow(cluster.name(), err),
            }
        }
        result
    }

    // ---- zone-wide sweeps ----------------------------------------------

    /// Live brokers of every registered cluster: cluster -> broker id -> znode.
    pub async fn brokers(&self) -> BTreeMap<String, BTreeMap<String, BrokerZnode>> {
        let mut result = BTreeMap::new();
        for cluster in self.sorted_clusters().await {
            let brokers = cluster.brokers().await;
            result.insert(cluster.name().to_string(), brokers);
        }
        result
    }

    /// Elected controller of every registered cluster; `None` mid-election.
    pub async fn controllers(&self) -> BTreeMap<String, Option<ControllerMeta>> {
        let mut result = BTreeMap::new();
        for cluster in self.sorted_clusters().await {
            let controller = match cluster.controller().await {
                Ok(controller) => controller,
                Err(err) => {
                    self.swallow(cluster.name(), err);
                    None
                }
            };
            result.insert(cluster.name().to_string(), controller);
        }
        result
    }

    /// Walk the tree from `root` looking for anything that ends in
    /// `/brokers/ids`; each hit is a cluster chroot. Already-known chroots
    /// are not descended into.
    pub async fn discover_clusters(&self, root: &str) -> Result<Vec<String>> {
        const BROKER_SUFFIX: &str = "/brokers/ids";
        let store = self.store().await?;

        let mut result: Vec<String> = Vec::new();
        let mut excluded: HashSet<String> = HashSet::from(["/zookeeper".to_string()]);
        let mut queue = VecDeque::from([root.to_string()]);

        'walk: while let Some(path) = queue.pop_back() {
            for known in &result {
                if path.starts_with(known.as_str()) {
                    continue 'walk;
                }
            }

            let children = store.get_children(&path).await?;
            for child in children {
                let child_path = if path == "/" {
                    format!("/{}", child)
                } else {
                    format!("{}/{}", path, child)
                };
                if excluded.contains(&child_path) {
                    continue;
                }
                if child_path.ends_with(BROKER_SUFFIX) {
                    let chroot = child_path[..child_path.len() - BROKER_SUFFIX.len()].to_string();
                    excluded.insert(chroot.clone());
                    result.push(chroot);
                } else {
                    queue.push_back(child_path);
                }
            }
        }

        Ok(result)
    }
}
