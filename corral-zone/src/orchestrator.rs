use std::collections::BTreeMap;

use corral_ensemble::{ChildrenWatch, EnsembleStore, NodeMode};
use tracing::warn;

use crate::errors::{Result, ZoneError};
use crate::meta::WebhookMeta;
use crate::paths;
use crate::zone::Zone;

/// Zone-global coordination primitives: actor registry, exclusive resource
/// claims, and the job-queue / webhook registries built on top of them.
///
/// Actors and claims are ephemeral nodes that vanish with their creator's
/// session, which is what makes the claim an ensemble-mediated lock.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    zone: Zone,
}

impl Orchestrator {
    pub(crate) fn new(zone: Zone) -> Self {
        Orchestrator { zone }
    }

    // ---- actors ---------------------------------------------------------

    pub async fn register_actor(&self, id: &str, payload: &[u8]) -> Result<()> {
        self.zone
            .create_ephemeral(&paths::actor_path(id), payload)
            .await
    }

    pub async fn actor_registered(&self, id: &str) -> Result<bool> {
        self.zone.exists(&paths::actor_path(id)).await
    }

    pub async fn resign_actor(&self, id: &str) -> Result<()> {
        self.zone.delete(&paths::actor_path(id)).await
    }

    /// actor id -> payload snapshot.
    pub async fn actors(&self) -> BTreeMap<String, Vec<u8>> {
        self.zone
            .children_with_data(paths::PUBSUB_ACTORS)
            .await
            .into_iter()
            .map(|(id, node)| (id, node.data))
            .collect()
    }

    /// Current member list plus a change subscription. The watch re-arms
    /// itself internally; callers re-subscribe only after the stream closes.
    pub async fn watch_actors(&self) -> Result<(Vec<String>, ChildrenWatch)> {
        self.watch_registry(paths::PUBSUB_ACTORS).await
    }

    async fn watch_registry(&self, root: &str) -> Result<(Vec<String>, ChildrenWatch)> {
        self.zone.ensure_path_exists(root).await?;
        let watch = self.zone.watch_children(root).await?;
        let store = self.zone.store().await?;
        let mut members = store.get_children(root).await?;
        members.sort();
        Ok((members, watch))
    }

    // ---- resource claims ------------------------------------------------

    /// Claim `root/resource` exclusively for `actor_id`. Claiming a resource
    /// this actor already holds is an idempotent success; a resource held by
    /// anyone else fails with `ClaimedByOthers`.
    pub async fn claim_resource(&self, actor_id: &str, root: &str, resource: &str) -> Result<()> {
        let path = format!("{}/{}", root, resource);
        self.zone.ensure_path_exists(root).await?;
        let store = self.zone.store().await?;
        match store
            .create(&path, actor_id.as_bytes(), NodeMode::Ephemeral)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_node_exists() => match store.get(&path).await? {
                Some(node) if node.data == actor_id.as_bytes() => Ok(()),
                Some(node) => Err(ZoneError::ClaimedByOthers {
                    resource: path,
                    owner: node.as_str_lossy().into_owned(),
                }),
                // the holder vanished between create and read; treat like a
                // foreign claim and let the caller retry
                None => Err(ZoneError::ClaimedByOthers {
                    resource: path,
                    owner: String::new(),
                }),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Release a claim held by `actor_id`. A missing node or a claim held by
    /// someone else fails with `NotClaimed`; the node is never touched.
    pub async fn release_resource(&self, actor_id: &str, root: &str, resource: &str) -> Result<()> {
        let path = format!("{}/{}", root, resource);
        let store = self.zone.store().await?;
        match store.get(&path).await? {
            Some(node) if node.data == actor_id.as_bytes() => {
                store.delete(&path).await?;
                Ok(())
            }
            _ => Err(ZoneError::NotClaimed {
                resource: path,
                actor: actor_id.to_string(),
            }),
        }
    }

    /// Current holder of a claim, if any.
    pub async fn resource_owner(&self, root: &str, resource: &str) -> Result<Option<String>> {
        let store = self.zone.store().await?;
        Ok(store
            .get(&format!("{}/{}", root, resource))
            .await?
            .map(|node| node.as_str_lossy().into_owned()))
    }

    // ---- job queues -----------------------------------------------------

    pub async fn create_job_queue(&self, topic: &str, cluster: &str) -> Result<()> {
        self.zone
            .create_permanent(&paths::job_queue_path(topic), cluster.as_bytes())
            .await
    }

    /// job queue -> owning cluster snapshot.
    pub async fn job_queues(&self) -> BTreeMap<String, String> {
        self.zone
            .children_with_data(paths::PUBSUB_JOB_QUEUES)
            .await
            .into_iter()
            .map(|(topic, node)| (topic, node.as_str_lossy().into_owned()))
            .collect()
    }

    pub async fn job_queue_cluster(&self, topic: &str) -> Result<String> {
        let store = self.zone.store().await?;
        let path = paths::job_queue_path(topic);
        store
            .get(&path)
            .await?
            .map(|node| node.as_str_lossy().into_owned())
            .ok_or_else(|| corral_ensemble::EnsembleError::NoNode(path).into())
    }

    pub async fn watch_job_queues(&self) -> Result<(Vec<String>, ChildrenWatch)> {
        self.watch_registry(paths::PUBSUB_JOB_QUEUES).await
    }

    pub async fn claim_job_queue(&self, actor_id: &str, job_queue: &str) -> Result<()> {
        self.claim_resource(actor_id, paths::PUBSUB_JOB_OWNERS, job_queue)
            .await
    }

    pub async fn release_job_queue(&self, actor_id: &str, job_queue: &str) -> Result<()> {
        self.release_resource(actor_id, paths::PUBSUB_JOB_OWNERS, job_queue)
            .await
    }

    pub async fn job_queue_owner(&self, job_queue: &str) -> Result<Option<String>> {
        self.resource_owner(paths::PUBSUB_JOB_OWNERS, job_queue).await
    }

    // ---- webhooks -------------------------------------------------------

    pub async fn create_or_update_webhook(&self, topic: &str, hook: &WebhookMeta) -> Result<()> {
        self.zone
            .create_or_set(&paths::webhook_path(topic), &hook.to_bytes())
            .await
    }

    pub async fn webhook_info(&self, topic: &str) -> Result<WebhookMeta> {
        let store = self.zone.store().await?;
        let path = paths::webhook_path(topic);
        let node = store
            .get(&path)
            .await?
            .ok_or_else(|| corral_ensemble::EnsembleError::NoNode(path.clone()))?;
        WebhookMeta::decode(&node.data).map_err(|err| ZoneError::Decode { path, source: err })
    }

    /// topic -> webhook registration snapshot. Malformed entries are logged
    /// and skipped.
    pub async fn webhooks(&self) -> BTreeMap<String, WebhookMeta> {
        let mut result = BTreeMap::new();
        for (topic, node) in self.zone.children_with_data(paths::PUBSUB_WEBHOOKS).await {
            match WebhookMeta::decode(&node.data) {
                Ok(hook) => {
                    result.insert(topic, hook);
                }
                Err(err) => warn!(topic = %topic, error = %err, "malformed webhook registration"),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use corral_ensemble::{EnsembleStorage, MemoryStore};

    fn test_zone() -> (Zone, MemoryStore) {
        let store = MemoryStore::new();
        let zone = Zone::with_store(
            ZoneConfig::new("test", ""),
            EnsembleStorage::InMemory(store.clone()),
        );
        (zone, store)
    }

    /// Claiming twice with the same actor succeeds both times and leaves a
    /// single node; a second actor always gets the conflict error and never
    /// mutates the claim.
    #[tokio::test]
    async fn test_claim_resource_idempotent_and_exclusive() {
        let (zone, _) = test_zone();
        let orchestrator = zone.orchestrator();

        orchestrator
            .claim_resource("actor-1", "/pubsub/job_owners", "orders")
            .await
            .unwrap();
        orchestrator
            .claim_resource("actor-1", "/pubsub/job_owners", "orders")
            .await
            .unwrap();
        assert_eq!(
            Some("actor-1".to_string()),
            orchestrator
                .resource_owner("/pubsub/job_owners", "orders")
                .await
                .unwrap()
        );

        let err = orchestrator
            .claim_resource("actor-2", "/pubsub/job_owners", "orders")
            .await
            .unwrap_err();
        match err {
            ZoneError::ClaimedByOthers { owner, .. } => assert_eq!("actor-1", owner),
            other => panic!("expected ClaimedByOthers, got {other}"),
        }
        // the claim is untouched
        assert_eq!(
            Some("actor-1".to_string()),
            orchestrator
                .resource_owner("/pubsub/job_owners", "orders")
                .await
                .unwrap()
        );
    }

    /// Release by a non-owner (or of an unclaimed resource) fails with
    /// NotClaimed; release by the owner removes the node.
    #[tokio::test]
    async fn test_release_resource_ownership() {
        let (zone, _) = test_zone();
        let orchestrator = zone.orchestrator();

        let err = orchestrator
            .release_resource("actor-1", "/pubsub/job_owners", "orders")
            .await
            .unwrap_err();
        assert!(matches!(err, ZoneError::NotClaimed { .. }));

        orchestrator
            .claim_job_queue("actor-1", "orders")
            .await
            .unwrap();
        let err = orchestrator
            .release_job_queue("actor-2", "orders")
            .await
            .unwrap_err();
        assert!(matches!(err, ZoneError::NotClaimed { .. }));

        orchestrator
            .release_job_queue("actor-1", "orders")
            .await
            .unwrap();
        assert_eq!(None, orchestrator.job_queue_owner("orders").await.unwrap());
    }

    /// Actor registration is ephemeral: an expired session removes it.
    #[tokio::test]
    async fn test_actor_registry() {
        let (zone, store) = test_zone();
        let orchestrator = zone.orchestrator();

        orchestrator.register_actor("a1", b"payload").await.unwrap();
        assert!(orchestrator.actor_registered("a1").await.unwrap());
        assert_eq!(
            b"payload".to_vec(),
            orchestrator.actors().await.remove("a1").unwrap()
        );

        store.expire_ephemeral();
        assert!(!orchestrator.actor_registered("a1").await.unwrap());
    }

    /// watch_actors returns the current members and then delivers changes.
    #[tokio::test]
    async fn test_watch_actors() {
        let (zone, _) = test_zone();
        let orchestrator = zone.orchestrator();

        orchestrator.register_actor("a1", b"").await.unwrap();
        let (members, mut watch) = orchestrator.watch_actors().await.unwrap();
        assert_eq!(vec!["a1".to_string()], members);

        orchestrator.register_actor("a2", b"").await.unwrap();
        assert_eq!(
            vec!["a1".to_string(), "a2".to_string()],
            watch.changed().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_job_queue_and_webhook_registries() {
        let (zone, _) = test_zone();
        let orchestrator = zone.orchestrator();

        orchestrator.create_job_queue("orders", "trade").await.unwrap();
        assert_eq!(
            "trade",
            orchestrator.job_queue_cluster("orders").await.unwrap()
        );
        assert_eq!(1, orchestrator.job_queues().await.len());

        let hook = WebhookMeta {
            cluster: "trade".to_string(),
            endpoints: vec!["http://localhost:9876".to_string()],
        };
        orchestrator
            .create_or_update_webhook("orders", &hook)
            .await
            .unwrap();
        assert_eq!(hook, orchestrator.webhook_info("orders").await.unwrap());

        // update in place
        let hook2 = WebhookMeta {
            cluster: "trade".to_string(),
            endpoints: vec!["http://localhost:9876".to_string(), "http://backup:9876".to_string()],
        };
        orchestrator
            .create_or_update_webhook("orders", &hook2)
            .await
            .unwrap();
        assert_eq!(hook2, orchestrator.webhooks().await["orders"]);
    }
}
