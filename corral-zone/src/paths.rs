//! Znode path layout. Zone-global roots are absolute; cluster-scoped paths
//! are built from the cluster's chroot.

/// Zone-global registry of cluster name -> chroot path.
pub const CLUSTER_ROOT: &str = "/_kafka_clusters";
/// Zone-global operator-maintained cluster descriptors.
pub const CLUSTER_INFO_ROOT: &str = "/_kafka_clusters_info";

pub const CONSUMERS_PATH: &str = "/consumers";
pub const BROKER_IDS_PATH: &str = "/brokers/ids";
pub const BROKER_TOPICS_PATH: &str = "/brokers/topics";
pub const CONTROLLER_PATH: &str = "/controller";
pub const CONTROLLER_EPOCH_PATH: &str = "/controller_epoch";

pub const PUBSUB_ACTORS: &str = "/pubsub/actors";
pub const PUBSUB_JOB_QUEUES: &str = "/pubsub/jobs";
pub const PUBSUB_JOB_OWNERS: &str = "/pubsub/job_owners";
pub const PUBSUB_WEBHOOKS: &str = "/pubsub/webhooks";

pub fn join_path(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        let trimmed = part.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        out.push('/');
        out.push_str(trimmed);
    }
    out
}

pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

pub fn cluster_path(cluster: &str) -> String {
    format!("{}/{}", CLUSTER_ROOT, cluster)
}

pub fn cluster_info_path(cluster: &str) -> String {
    format!("{}/{}", CLUSTER_INFO_ROOT, cluster)
}

pub fn broker_ids_root(chroot: &str) -> String {
    format!("{}{}", chroot, BROKER_IDS_PATH)
}

pub fn broker_path(chroot: &str, id: i32) -> String {
    format!("{}/{}", broker_ids_root(chroot), id)
}

pub fn topics_root(chroot: &str) -> String {
    format!("{}{}", chroot, BROKER_TOPICS_PATH)
}

pub fn topic_path(chroot: &str, topic: &str) -> String {
    format!("{}/{}", topics_root(chroot), topic)
}

pub fn partitions_path(chroot: &str, topic: &str) -> String {
    format!("{}/partitions", topic_path(chroot, topic))
}

pub fn partition_state_path(chroot: &str, topic: &str, partition: i32) -> String {
    format!("{}/{}/state", partitions_path(chroot, topic), partition)
}

pub fn controller_path(chroot: &str) -> String {
    format!("{}{}", chroot, CONTROLLER_PATH)
}

pub fn controller_epoch_path(chroot: &str) -> String {
    format!("{}{}", chroot, CONTROLLER_EPOCH_PATH)
}

pub fn consumer_groups_root(chroot: &str) -> String {
    format!("{}{}", chroot, CONSUMERS_PATH)
}

pub fn consumer_group_root(chroot: &str, group: &str) -> String {
    format!("{}/{}", consumer_groups_root(chroot), group)
}

pub fn consumer_group_ids_path(chroot: &str, group: &str) -> String {
    format!("{}/ids", consumer_group_root(chroot, group))
}

pub fn consumer_group_offsets_path(chroot: &str, group: &str) -> String {
    format!("{}/offsets", consumer_group_root(chroot, group))
}

pub fn consumer_group_offsets_of_topic_path(chroot: &str, group: &str, topic: &str) -> String {
    format!("{}/{}", consumer_group_offsets_path(chroot, group), topic)
}

pub fn consumer_group_offset_path(chroot: &str, group: &str, topic: &str, partition: &str) -> String {
    format!(
        "{}/{}",
        consumer_group_offsets_of_topic_path(chroot, group, topic),
        partition
    )
}

pub fn consumer_group_owners_of_topic_path(chroot: &str, group: &str, topic: &str) -> String {
    format!("{}/owners/{}", consumer_group_root(chroot, group), topic)
}

pub fn actor_path(id: &str) -> String {
    format!("{}/{}", PUBSUB_ACTORS, id)
}

pub fn job_queue_path(topic: &str) -> String {
    format!("{}/{}", PUBSUB_JOB_QUEUES, topic)
}

pub fn webhook_path(topic: &str) -> String {
    format!("{}/{}", PUBSUB_WEBHOOKS, topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_scoped_paths() {
        let chroot = "/test";
        assert_eq!("/test/brokers/ids", broker_ids_root(chroot));
        assert_eq!("/test/brokers/ids/2", broker_path(chroot, 2));
        assert_eq!("/test/controller", controller_path(chroot));
        assert_eq!("/test/controller_epoch", controller_epoch_path(chroot));
        assert_eq!("/test/brokers/topics", topics_root(chroot));
        assert_eq!("/test/brokers/topics/t1/partitions", partitions_path(chroot, "t1"));
        assert_eq!(
            "/test/brokers/topics/t1/partitions/2/state",
            partition_state_path(chroot, "t1", 2)
        );
        assert_eq!("/test/consumers", consumer_groups_root(chroot));
        assert_eq!(
            "/test/consumers/console-group",
            consumer_group_root(chroot, "console-group")
        );
        assert_eq!(
            "/test/consumers/console-group/ids",
            consumer_group_ids_path(chroot, "console-group")
        );
        assert_eq!(
            "/test/consumers/console-group/offsets",
            consumer_group_offsets_path(chroot, "console-group")
        );
        assert_eq!(
            "/test/consumers/console-group/offsets/t1",
            consumer_group_offsets_of_topic_path(chroot, "console-group", "t1")
        );
        assert_eq!(
            "/test/consumers/console-group/offsets/t1/0",
            consumer_group_offset_path(chroot, "console-group", "t1", "0")
        );
        assert_eq!(
            "/test/consumers/console-group/owners/t1",
            consumer_group_owners_of_topic_path(chroot, "console-group", "t1")
        );
    }

    #[test]
    fn test_zone_global_paths() {
        assert_eq!("/_kafka_clusters/test-cluster", cluster_path("test-cluster"));
        assert_eq!(
            "/_kafka_clusters_info/test-cluster",
            cluster_info_path("test-cluster")
        );
        assert_eq!("/pubsub/actors/a1", actor_path("a1"));
        assert_eq!("/pubsub/jobs/orders", job_queue_path("orders"));
        assert_eq!("/pubsub/webhooks/orders", webhook_path("orders"));
    }

    #[test]
    fn test_join_path() {
        assert_eq!("/cluster/brokers/1", join_path(&["/cluster", "brokers", "1"]));
        assert_eq!("/a/b", join_path(&["a", "", "b/"]));
        assert_eq!("/", parent_path("/brokers"));
        assert_eq!("/brokers", parent_path("/brokers/ids"));
    }
}
