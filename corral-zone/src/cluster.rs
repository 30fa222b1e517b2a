use std::collections::BTreeMap;

use corral_ensemble::{EnsembleError, EnsembleStore};
use tracing::warn;

use crate::errors::{Result, ZoneError};
use crate::kafka::{BrokerApi, BrokerApiError};
use crate::meta::{
    decode_consumer_record, consumer_id_of_owner, BrokerInfo, BrokerZnode, ClusterInfo,
    ConsumerIdRecord, ConsumerMeta, ConsumerZnode, ControllerMeta, ControllerZnode,
    PartitionState, TopicZnode, ZkTimestamp,
};
use crate::paths;
use crate::zone::Zone;

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod cluster_tests;

/// A view over one broker cluster rooted at a chroot path. The view itself
/// holds no state: every operation is a fresh, eventually consistent
/// snapshot combined from znode reads and, where needed, broker-protocol
/// queries.
#[derive(Debug, Clone)]
pub struct Cluster {
    zone: Zone,
    name: String,
    chroot: String,
}

impl Cluster {
    pub(crate) fn new(zone: Zone, name: &str, chroot: &str) -> Self {
        Cluster {
            zone,
            name: name.to_string(),
            chroot: chroot.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chroot(&self) -> &str {
        &self.chroot
    }

    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    /// `ensemble.connect` string a broker would use for this cluster.
    pub fn ensemble_connect_addr(&self) -> String {
        format!("{}{}", self.zone.config().ensemble_addrs, self.chroot)
    }

    // ---- brokers --------------------------------------------------------

    /// Online brokers: ephemeral children of `/brokers/ids`. Absence of the
    /// node means the broker is dead, whatever the roster says.
    pub async fn brokers(&self) -> BTreeMap<String, BrokerZnode> {
        let mut result = BTreeMap::new();
        let root = paths::broker_ids_root(&self.chroot);
        for (id, node) in self.zone.children_with_data(&root).await {
            match BrokerZnode::decode(&id, &node.data) {
                Ok(broker) => {
                    result.insert(id, broker);
                }
                Err(err) => self.zone.swallow(
                    &format!("{}/{}", root, id),
                    ZoneError::Decode {
                        path: format!("{}/{}", root, id),
                        source: err,
                    },
                ),
            }
        }
        result
    }

    pub async fn broker(&self, id: i32) -> Result<Option<BrokerZnode>> {
        let store = self.zone.store().await?;
        let path = paths::broker_path(&self.chroot, id);
        match store.get(&path).await? {
            Some(node) => {
                let broker = BrokerZnode::decode(&id.to_string(), &node.data)
                    .map_err(|err| ZoneError::Decode { path, source: err })?;
                Ok(Some(broker))
            }
            None => Ok(None),
        }
    }

    pub async fn broker_online(&self, id: i32) -> Result<bool> {
        self.zone
            .exists(&paths::broker_path(&self.chroot, id))
            .await
    }

    /// `host:port` of every live broker.
    pub async fn broker_list(&self) -> Vec<String> {
        self.brokers()
            .await
            .values()
            .map(BrokerZnode::addr)
            .collect()
    }

    // ---- controller -----------------------------------------------------

    /// The elected controller, or `Ok(None)` while an election is underway.
    pub async fn controller(&self) -> Result<Option<ControllerMeta>> {
        let store = self.zone.store().await?;
        let path = paths::controller_path(&self.chroot);
        let node = match store.get(&path).await? {
            Some(node) => node,
            None => return Ok(None),
        };

        let znode: ControllerZnode = serde_json::from_slice(&node.data)
            .map_err(|err| ZoneError::Decode { path, source: err })?;
        let broker = self.broker(znode.brokerid).await?;

        let epoch = store
            .get(&paths::controller_epoch_path(&self.chroot))
            .await?
            .map(|n| n.as_str_lossy().trim().to_string())
            .unwrap_or_default();

        Ok(Some(ControllerMeta {
            broker,
            mtime: ZkTimestamp(node.stat.mtime_ms),
            epoch,
        }))
    }

    // ---- topics ---------------------------------------------------------

    pub async fn topics(&self) -> Vec<String> {
        self.zone.children(&paths::topics_root(&self.chroot)).await
    }

    /// Partition ids of a topic as assigned in znodes.
    pub async fn partitions(&self, topic: &str) -> Vec<i32> {
        let mut ids: Vec<i32> = self
            .zone
            .children(&paths::partitions_path(&self.chroot, topic))
            .await
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// The partition -> replica assignment stored under the topic znode.
    pub async fn topic_znode(&self, topic: &str) -> Result<Option<TopicZnode>> {
        let store = self.zone.store().await?;
        let path = paths::topic_path(&self.chroot, topic);
        match store.get(&path).await? {
            Some(node) => {
                let znode = TopicZnode::decode(topic, &node.data)
                    .map_err(|err| ZoneError::Decode { path, source: err })?;
                Ok(Some(znode))
            }
            None => Ok(None),
        }
    }

    /// In-sync replica set of one partition, with the state znode's
    /// modification and creation times. The ISR comes from znodes and must be
    /// cross-checked against the broker protocol's replica list by callers
    /// that care about sync status.
    pub async fn isr(&self, topic: &str, partition: i32) -> Result<(Vec<i32>, ZkTimestamp, ZkTimestamp)> {
        let store = self.zone.store().await?;
        let path = paths::partition_state_path(&self.chroot, topic, partition);
        let node = store
            .get(&path)
            .await?
            .ok_or_else(|| EnsembleError::NoNode(path.clone()))?;
        let state: PartitionState = serde_json::from_slice(&node.data)
            .map_err(|err| ZoneError::Decode { path, source: err })?;
        let mut isr = state.isr;
        isr.sort_unstable();
        Ok((
            isr,
            ZkTimestamp(node.stat.mtime_ms),
            ZkTimestamp(node.stat.ctime_ms),
        ))
    }

    // ---- registered descriptor -----------------------------------------

    /// The operator-maintained cluster descriptor; missing descriptors are
    /// seeded with defaults on first read.
    pub async fn registered_info(&self) -> Result<ClusterInfo> {
        let store = self.zone.store().await?;
        let path = paths::cluster_info_path(&self.name);
        match store.get(&path).await? {
            Some(node) => serde_json::from_slice(&node.data)
                .map_err(|err| ZoneError::Decode { path, source: err }),
            None => {
                let info = ClusterInfo::default();
                self.write_registered_info(&info).await?;
                Ok(info)
            }
        }
    }

    pub async fn write_registered_info(&self, info: &ClusterInfo) -> Result<()> {
        let data = serde_json::to_vec(info).map_err(EnsembleError::from)?;
        self.zone
            .create_or_set(&paths::cluster_info_path(&self.name), &data)
            .await
    }

    /// Read-modify-write the descriptor.
    pub async fn update_registered_info<F>(&self, update: F) -> Result<ClusterInfo>
    where
        F: FnOnce(&mut ClusterInfo),
    {
        let mut info = self.registered_info().await?;
        update(&mut info);
        self.write_registered_info(&info).await?;
        Ok(info)
    }

    /// Add a broker to the roster. Duplicate ids and duplicate `host:port`
    /// pairs are rejected.
    pub async fn register_broker(&self, id: i32, host: &str, port: u16) -> Result<()> {
        let info = self.registered_info().await?;
        for existing in &info.roster {
            if existing.id == id {
                return Err(ZoneError::Other(format!("dup broker id: {}", id)));
            }
            if existing.host == host && existing.port == port {
                return Err(ZoneError::Other(format!("dup host and port: {}:{}", host, port)));
            }
        }
        self.update_registered_info(|info| {
            info.roster.push(BrokerInfo {
                id,
                host: host.to_string(),
                port,
            });
        })
        .await?;
        Ok(())
    }

    pub async fn unregister_broker(&self, id: i32) -> Result<()> {
        self.update_registered_info(|info| info.roster.retain(|b| b.id != id))
            .await?;
        Ok(())
    }

    // ---- consumer groups ------------------------------------------------

    /// All groups with their live member registrations. A group with zero
    /// members is offline but still listed; its committed offsets remain
    /// queryable.
    pub async fn consumer_groups(&self) -> BTreeMap<String, BTreeMap<String, ConsumerZnode>> {
        let mut result = BTreeMap::new();
        for group in self
            .zone
            .children(&paths::consumer_groups_root(&self.chroot))
            .await
        {
            let ids_path = paths::consumer_group_ids_path(&self.chroot, &group);
            let mut members = BTreeMap::new();
            for (consumer_id, node) in self.zone.children_with_data(&ids_path).await {
                match decode_consumer_record(&consumer_id, &node.data) {
                    ConsumerIdRecord::Registration(consumer) => {
                        members.insert(consumer_id, consumer);
                    }
                    ConsumerIdRecord::Unknown(raw) => {
                        // foreign SDKs leave non-registration payloads here
                        warn!(
                            cluster = %self.name,
                            group = %group,
                            consumer = %consumer_id,
                            payload = %String::from_utf8_lossy(&raw),
                            "unrecognized consumer registration, skipped"
                        );
                    }
                }
            }
            result.insert(group, members);
        }
        result
    }

    /// partition id -> owning consumer id for one group/topic.
    pub async fn owners_of_group_topic(&self, group: &str, topic: &str) -> BTreeMap<String, String> {
        let path = paths::consumer_group_owners_of_topic_path(&self.chroot, group, topic);
        self.zone
            .children_with_data(&path)
            .await
            .into_iter()
            .map(|(partition, node)| (partition, consumer_id_of_owner(&node.as_str_lossy())))
            .collect()
    }

    /// topic -> partition id -> committed offset for one group.
    pub async fn consumer_offsets_of_group(
        &self,
        group: &str,
    ) -> BTreeMap<String, BTreeMap<String, i64>> {
        let mut result = BTreeMap::new();
        let offsets_root = paths::consumer_group_offsets_path(&self.chroot, group);
        for topic in self.zone.children(&offsets_root).await {
            let mut offsets = BTreeMap::new();
            let topic_path = paths::consumer_group_offsets_of_topic_path(&self.chroot, group, &topic);
            for (partition, node) in self.zone.children_with_data(&topic_path).await {
                match node.as_str_lossy().trim().parse::<i64>() {
                    Ok(offset) => {
                        offsets.insert(partition, offset);
                    }
                    Err(err) => warn!(
                        cluster = %self.name,
                        topic = %topic,
                        partition = %partition,
                        error = %err,
                        "malformed committed offset"
                    ),
                }
            }
            result.insert(topic, offsets);
        }
        result
    }

    /// Sum of all committed offsets across groups, optionally filtered by a
    /// topic substring.
    pub async fn total_consumer_offsets(&self, topic_pattern: &str) -> i64 {
        let mut total = 0;
        for group in self
            .zone
            .children(&paths::consumer_groups_root(&self.chroot))
            .await
        {
            for (topic, offsets) in self.consumer_offsets_of_group(&group).await {
                if !topic_pattern.is_empty() && !topic.contains(topic_pattern) {
                    continue;
                }
                total += offsets.values().sum::<i64>();
            }
        }
        total
    }

    /// Groups whose members subscribe to a topic that has no owner entries:
    /// registrations left behind by crashed rebalances.
    pub async fn zombie_groups(&self) -> Vec<String> {
        let mut zombies = Vec::new();
        for (group, members) in self.consumer_groups().await {
            let mut is_zombie = false;
            for consumer in members.values() {
                for topic in consumer.subscription.keys() {
                    if self.owners_of_group_topic(&group, topic).await.is_empty() {
                        is_zombie = true;
                    }
                }
            }
            if is_zombie {
                zombies.push(group);
            }
        }
        zombies
    }

    /// Lag snapshot of one partition. `online` mirrors whether an owner
    /// entry for the partition still exists.
    pub async fn lag(
        &self,
        api: &dyn BrokerApi,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<ConsumerMeta> {
        let store = self.zone.store().await?;
        let partition_id = partition.to_string();
        let offset_path =
            paths::consumer_group_offset_path(&self.chroot, group, topic, &partition_id);
        let node = store
            .get(&offset_path)
            .await?
            .ok_or_else(|| EnsembleError::NoNode(offset_path.clone()))?;
        let consumer_offset: i64 = node.as_str_lossy().trim().parse().unwrap_or(0);

        let owners = self.owners_of_group_topic(group, topic).await;
        let consumers = self
            .consumer_groups()
            .await
            .remove(group)
            .unwrap_or_default();
        let producer_offset = api.latest_offset(topic, partition).await?;

        Ok(ConsumerMeta {
            group: group.to_string(),
            online: owners.contains_key(&partition_id),
            topic: topic.to_string(),
            partition_id: partition_id.clone(),
            mtime: ZkTimestamp(node.stat.mtime_ms),
            consumer_offset,
            producer_offset,
            lag: (producer_offset - consumer_offset).max(0),
            consumer: owners
                .get(&partition_id)
                .and_then(|cid| consumers.get(cid))
                .cloned(),
        })
    }

    /// Lag snapshots for every group whose name contains `pattern`, keyed by
    /// group. Only partitions with a live owner are reported; a topic whose
    /// owners are gone entirely is skipped. Transient broker-protocol
    /// failures skip the affected partition, never the whole sweep.
    pub async fn consumers_by_group(
        &self,
        api: &dyn BrokerApi,
        pattern: &str,
    ) -> BTreeMap<String, Vec<ConsumerMeta>> {
        let mut result: BTreeMap<String, Vec<ConsumerMeta>> = BTreeMap::new();
        let consumer_groups = self.consumer_groups().await;

        for (group, consumers) in consumer_groups {
            if !pattern.is_empty() && !group.contains(pattern) {
                continue;
            }

            let topics = self
                .zone
                .children(&paths::consumer_group_offsets_path(&self.chroot, &group))
                .await;
            for topic in topics {
                let owners = self.owners_of_group_topic(&group, &topic).await;
                if owners.is_empty() {
                    // no online consumers running this topic
                    continue;
                }

                let offsets_path =
                    paths::consumer_group_offsets_of_topic_path(&self.chroot, &group, &topic);
                for (partition_id, node) in self.zone.children_with_data(&offsets_path).await {
                    if !owners.contains_key(&partition_id) {
                        continue;
                    }

                    let consumer_offset: i64 = match node.as_str_lossy().trim().parse() {
                        Ok(offset) => offset,
                        Err(err) => {
                            warn!(
                                cluster = %self.name,
                                topic = %topic,
                                partition = %partition_id,
                                error = %err,
                                "malformed committed offset"
                            );
                            continue;
                        }
                    };
                    let partition: i32 = match partition_id.parse() {
                        Ok(partition) => partition,
                        Err(err) => {
                            warn!(
                                cluster = %self.name,
                                topic = %topic,
                                partition = %partition_id,
                                error = %err,
                                "invalid partition id"
                            );
                            continue;
                        }
                    };

                    let producer_offset = match api.latest_offset(&topic, partition).await {
                        Ok(offset) => offset,
                        Err(BrokerApiError::UnknownTopicOrPartition) => {
                            // consumer is consuming a topic the brokers no longer know
                            warn!(
                                cluster = %self.name,
                                group = %group,
                                topic = %topic,
                                partition = %partition_id,
                                "invalid topic for group"
                            );
                            continue;
                        }
                        Err(err) => {
                            warn!(
                                cluster = %self.name,
                                group = %group,
                                topic = %topic,
                                partition = %partition_id,
                                error = %err,
                                "high-water mark fetch failed"
                            );
                            continue;
                        }
                    };

                    let meta = ConsumerMeta {
                        group: group.clone(),
                        online: !consumers.is_empty(),
                        topic: topic.clone(),
                        partition_id: partition_id.clone(),
                        mtime: ZkTimestamp(node.stat.mtime_ms),
                        consumer_offset,
                        producer_offset,
                        lag: (producer_offset - consumer_offset).max(0),
                        consumer: owners
                            .get(&partition_id)
                            .and_then(|cid| consumers.get(cid))
                            .cloned(),
                    };
                    result.entry(group.clone()).or_default().push(meta);
                }
            }
        }

        result
    }

    // ---- writes ---------------------------------------------------------

    /// Create a topic through the broker protocol and return the step log.
    /// The znodes are written by the controller, not by this call; without a
    /// live broker there is nobody to carry the request.
    pub async fn add_topic(
        &self,
        api: &dyn BrokerApi,
        topic: &str,
        partitions: i32,
        replicas: i32,
    ) -> Result<Vec<String>> {
        if self.broker_list().await.is_empty() {
            return Err(ZoneError::NoLiveBrokers(self.name.clone()));
        }
        Ok(api.create_topic(topic, partitions, replicas).await?)
    }

    /// Overwrite committed offsets directly in znodes, bypassing the broker
    /// protocol. All partitions of the topic when `partition` is `None`.
    /// Only safe while the consuming processes are stopped; nothing enforces
    /// that.
    pub async fn reset_consumer_offset(
        &self,
        topic: &str,
        group: &str,
        partition: Option<i32>,
        offset: i64,
    ) -> Result<usize> {
        let data = offset.to_string();
        match partition {
            Some(partition) => {
                let path = paths::consumer_group_offset_path(
                    &self.chroot,
                    group,
                    topic,
                    &partition.to_string(),
                );
                self.zone.set(&path, data.as_bytes()).await?;
                Ok(1)
            }
            None => {
                let topic_path =
                    paths::consumer_group_offsets_of_topic_path(&self.chroot, group, topic);
                let partitions = self.zone.children(&topic_path).await;
                let mut updated = 0;
                for partition in partitions {
                    let path =
                        paths::consumer_group_offset_path(&self.chroot, group, topic, &partition);
                    self.zone.set(&path, data.as_bytes()).await?;
                    updated += 1;
                }
                Ok(updated)
            }
        }
    }
}
