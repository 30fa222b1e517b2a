use corral_ensemble::{EnsembleStorage, MemoryStore};

use crate::config::ZoneConfig;
use crate::errors::ZoneError;
use crate::kafka::{PartitionMeta, StaticBrokerApi};
use crate::zone::Zone;

const CHROOT: &str = "/test-trade";

async fn test_cluster() -> (super::Cluster, MemoryStore) {
    let store = MemoryStore::new();
    let zone = Zone::with_store(
        ZoneConfig::new("test", ""),
        EnsembleStorage::InMemory(store.clone()),
    );
    zone.register_cluster("trade", CHROOT).await.unwrap();
    let cluster = zone.cluster("trade").await.unwrap();
    (cluster, store)
}

async fn seed_broker(cluster: &super::Cluster, id: i32, host: &str, port: u16) {
    let data = format!(
        r#"{{"jmx_port":-1,"timestamp":"1447157138058","host":"{}","version":1,"port":{}}}"#,
        host, port
    );
    cluster
        .zone()
        .create_ephemeral(
            &crate::paths::broker_path(CHROOT, id),
            data.as_bytes(),
        )
        .await
        .unwrap();
}

async fn seed_consumer_group(cluster: &super::Cluster, group: &str, consumer_id: &str, topic: &str) {
    let zone = cluster.zone();
    let registration = format!(
        r#"{{"version":1,"subscription":{{"{}":1}},"pattern":"static","timestamp":"1473402575029"}}"#,
        topic
    );
    zone.create_ephemeral(
        &format!(
            "{}/{}",
            crate::paths::consumer_group_ids_path(CHROOT, group),
            consumer_id
        ),
        registration.as_bytes(),
    )
    .await
    .unwrap();
}

/// A broker is online iff its ephemeral node exists, independent of the
/// roster.
#[tokio::test]
async fn test_broker_online_follows_ephemeral_node() {
    let (cluster, store) = test_cluster().await;
    seed_broker(&cluster, 0, "192.168.3.5", 9092).await;
    seed_broker(&cluster, 1, "192.168.3.6", 9092).await;

    // the roster claims a third broker that is not live
    cluster.register_broker(2, "192.168.3.7", 9092).await.unwrap();

    let brokers = cluster.brokers().await;
    assert_eq!(2, brokers.len());
    assert!(cluster.broker_online(0).await.unwrap());
    assert!(!cluster.broker_online(2).await.unwrap());
    assert_eq!("192.168.3.5:9092", brokers["0"].addr());

    // session loss kills every live broker, roster or not
    store.expire_ephemeral();
    assert!(cluster.brokers().await.is_empty());
    assert!(!cluster.broker_online(0).await.unwrap());
}

#[tokio::test]
async fn test_broker_roster_rejects_duplicates() {
    let (cluster, _) = test_cluster().await;
    cluster.register_broker(0, "h1", 9092).await.unwrap();

    let err = cluster.register_broker(0, "h2", 9092).await.unwrap_err();
    assert!(matches!(err, ZoneError::Other(_)));
    let err = cluster.register_broker(1, "h1", 9092).await.unwrap_err();
    assert!(matches!(err, ZoneError::Other(_)));

    cluster.register_broker(1, "h2", 9092).await.unwrap();
    assert_eq!(2, cluster.registered_info().await.unwrap().roster.len());

    cluster.unregister_broker(0).await.unwrap();
    assert_eq!(1, cluster.registered_info().await.unwrap().roster.len());
}

#[tokio::test]
async fn test_registered_info_update_and_public_listing() {
    let (cluster, _) = test_cluster().await;
    let zone = cluster.zone().clone();

    // first read seeds the descriptor with defaults
    let info = cluster.registered_info().await.unwrap();
    assert_eq!(2, info.replicas);
    assert!(!info.public);
    assert!(zone.public_clusters().await.is_empty());

    cluster
        .update_registered_info(|info| {
            info.public = true;
            info.nickname = "primary".to_string();
        })
        .await
        .unwrap();

    let info = cluster.registered_info().await.unwrap();
    assert!(info.public);
    assert_eq!("primary", info.nickname);

    let public = zone.public_clusters().await;
    assert_eq!(1, public.len());
    assert_eq!("trade", public[0].name());
}

/// Mid-election there is no controller node and the view reports None
/// instead of an error.
#[tokio::test]
async fn test_controller_absent_and_present() {
    let (cluster, _) = test_cluster().await;
    assert!(cluster.controller().await.unwrap().is_none());

    seed_broker(&cluster, 5, "192.168.3.5", 9092).await;
    let zone = cluster.zone();
    zone.create_ephemeral(
        &crate::paths::controller_path(CHROOT),
        br#"{"version":1,"brokerid":5,"timestamp":"1447157138058"}"#,
    )
    .await
    .unwrap();
    zone.create_permanent(&crate::paths::controller_epoch_path(CHROOT), b"7")
        .await
        .unwrap();

    let controller = cluster.controller().await.unwrap().expect("controller");
    assert_eq!("7", controller.epoch);
    assert_eq!(Some(7), controller.epoch_value());
    assert_eq!("5", controller.broker.expect("broker znode").id);
}

#[tokio::test]
async fn test_isr_read_and_cross_check() {
    let (cluster, _) = test_cluster().await;
    let zone = cluster.zone();
    zone.create_permanent(
        &crate::paths::partition_state_path(CHROOT, "t1", 0),
        br#"{"controller_epoch":3,"leader":1,"version":1,"leader_epoch":0,"isr":[2,1]}"#,
    )
    .await
    .unwrap();

    let (isr, _mtime, _ctime) = cluster.isr("t1", 0).await.unwrap();
    assert_eq!(vec![1, 2], isr);

    // the broker protocol knows three replicas: the partition is
    // under-replicated even though the ISR read succeeded
    let api = StaticBrokerApi::new().with_topic(
        "t1",
        vec![PartitionMeta {
            id: 0,
            leader: 1,
            replicas: vec![1, 2, 3],
            isr: vec![1, 2],
        }],
    );
    use crate::kafka::BrokerApi;
    let replicas = api.replicas("t1", 0).await.unwrap();
    assert_ne!(replicas.len(), isr.len());

    // a missing state znode is an error, not an empty answer
    assert!(cluster.isr("t1", 9).await.is_err());
}

#[tokio::test]
async fn test_topics_and_partitions() {
    let (cluster, _) = test_cluster().await;
    let zone = cluster.zone();
    zone.create_permanent(
        &crate::paths::topic_path(CHROOT, "t1"),
        br#"{"version":1,"partitions":{"0":[1,2],"1":[2,3]}}"#,
    )
    .await
    .unwrap();
    zone.create_permanent(&crate::paths::partition_state_path(CHROOT, "t1", 1), b"{}")
        .await
        .unwrap();
    zone.create_permanent(&crate::paths::partition_state_path(CHROOT, "t1", 0), b"{}")
        .await
        .unwrap();

    assert_eq!(vec!["t1".to_string()], cluster.topics().await);
    assert_eq!(vec![0, 1], cluster.partitions("t1").await);

    let znode = cluster.topic_znode("t1").await.unwrap().expect("topic");
    assert_eq!(vec![1, 2], znode.partitions["0"]);
    assert!(cluster.topic_znode("missing").await.unwrap().is_none());
}

/// A group with zero live ids is offline but its committed offsets stay
/// queryable.
#[tokio::test]
async fn test_offline_group_offsets_queryable() {
    let (cluster, store) = test_cluster().await;
    let zone = cluster.zone();
    seed_consumer_group(&cluster, "g1", "g1_host-1447657979158-aaaa", "t1").await;
    zone.create_permanent(
        &crate::paths::consumer_group_offset_path(CHROOT, "g1", "t1", "0"),
        b"42",
    )
    .await
    .unwrap();

    store.expire_ephemeral();

    let groups = cluster.consumer_groups().await;
    assert!(groups["g1"].is_empty(), "group is offline");
    let offsets = cluster.consumer_offsets_of_group("g1").await;
    assert_eq!(42, offsets["t1"]["0"]);
    assert_eq!(42, cluster.total_consumer_offsets("").await);
}

/// Full lag sweep: owners gate which partitions are reported, lag is
/// clamped at zero, unknown topics are skipped.
#[tokio::test]
async fn test_consumers_by_group() {
    let (cluster, _) = test_cluster().await;
    let zone = cluster.zone();
    let consumer_id = "g1_host-1447657979158-aaaa";
    seed_consumer_group(&cluster, "g1", consumer_id, "t1").await;

    // committed offsets for two partitions plus one on a vanished topic
    for (topic, partition, offset) in [("t1", "0", "100"), ("t1", "1", "200"), ("gone", "0", "5")] {
        zone.create_permanent(
            &crate::paths::consumer_group_offset_path(CHROOT, "g1", topic, partition),
            offset.as_bytes(),
        )
        .await
        .unwrap();
    }
    // owners: partition 0 of t1 owned, partition 1 not, topic "gone" owned
    zone.create_ephemeral(
        &format!(
            "{}/0",
            crate::paths::consumer_group_owners_of_topic_path(CHROOT, "g1", "t1")
        ),
        format!("{}-1", consumer_id).as_bytes(),
    )
    .await
    .unwrap();
    zone.create_ephemeral(
        &format!(
            "{}/0",
            crate::paths::consumer_group_owners_of_topic_path(CHROOT, "g1", "gone")
        ),
        consumer_id.as_bytes(),
    )
    .await
    .unwrap();

    let api = StaticBrokerApi::new().with_watermark("t1", 0, 120);

    let lags = cluster.consumers_by_group(&api, "").await;
    let metas = &lags["g1"];
    assert_eq!(1, metas.len(), "unowned partition and unknown topic skipped");
    let meta = &metas[0];
    assert_eq!("t1", meta.topic);
    assert_eq!("0", meta.partition_id);
    assert_eq!(100, meta.consumer_offset);
    assert_eq!(120, meta.producer_offset);
    assert_eq!(20, meta.lag);
    assert!(meta.online);
    // the owner payload carried a JVM thread suffix; it still resolves to
    // the registration
    assert_eq!(consumer_id, meta.consumer.as_ref().expect("consumer").id);

    // pattern filter
    assert!(cluster.consumers_by_group(&api, "nope").await.is_empty());
}

/// lag == 0 whenever produced == consumed, and never negative.
#[tokio::test]
async fn test_lag_clamped_non_negative() {
    let (cluster, _) = test_cluster().await;
    let zone = cluster.zone();
    zone.create_permanent(
        &crate::paths::consumer_group_offset_path(CHROOT, "g1", "t1", "0"),
        b"120",
    )
    .await
    .unwrap();
    zone.create_ephemeral(
        &format!(
            "{}/0",
            crate::paths::consumer_group_owners_of_topic_path(CHROOT, "g1", "t1")
        ),
        b"g1_host-1-a",
    )
    .await
    .unwrap();

    let api = StaticBrokerApi::new().with_watermark("t1", 0, 120);
    let meta = cluster.lag(&api, "g1", "t1", 0).await.unwrap();
    assert_eq!(0, meta.lag);
    assert!(meta.online);

    // commit raced ahead of the watermark read: clamp, don't go negative
    let api = StaticBrokerApi::new().with_watermark("t1", 0, 110);
    let meta = cluster.lag(&api, "g1", "t1", 0).await.unwrap();
    assert_eq!(0, meta.lag);
}

#[tokio::test]
async fn test_zombie_groups() {
    let (cluster, _) = test_cluster().await;
    let zone = cluster.zone();

    // g1 subscribes t1 and owns it; g2 subscribes t2 with no owners
    seed_consumer_group(&cluster, "g1", "g1_host-1-a", "t1").await;
    zone.create_ephemeral(
        &format!(
            "{}/0",
            crate::paths::consumer_group_owners_of_topic_path(CHROOT, "g1", "t1")
        ),
        b"g1_host-1-a",
    )
    .await
    .unwrap();
    seed_consumer_group(&cluster, "g2", "g2_host-1-a", "t2").await;

    assert_eq!(vec!["g2".to_string()], cluster.zombie_groups().await);
}

#[tokio::test]
async fn test_reset_consumer_offset() {
    let (cluster, _) = test_cluster().await;
    let zone = cluster.zone();
    for partition in ["0", "1"] {
        zone.create_permanent(
            &crate::paths::consumer_group_offset_path(CHROOT, "g1", "t1", partition),
            b"100",
        )
        .await
        .unwrap();
    }

    assert_eq!(
        2,
        cluster
            .reset_consumer_offset("t1", "g1", None, 0)
            .await
            .unwrap()
    );
    assert_eq!(0, cluster.consumer_offsets_of_group("g1").await["t1"]["0"]);

    assert_eq!(
        1,
        cluster
            .reset_consumer_offset("t1", "g1", Some(1), 7)
            .await
            .unwrap()
    );
    let offsets = cluster.consumer_offsets_of_group("g1").await;
    assert_eq!(0, offsets["t1"]["0"]);
    assert_eq!(7, offsets["t1"]["1"]);
}

#[tokio::test]
async fn test_add_topic_step_log() {
    let (cluster, _) = test_cluster().await;
    let api = StaticBrokerApi::new();

    // without a live broker the request has no carrier
    let err = cluster.add_topic(&api, "t9", 3, 2).await.unwrap_err();
    assert!(matches!(err, ZoneError::NoLiveBrokers(_)));

    seed_broker(&cluster, 0, "192.168.3.5", 9092).await;
    let log = cluster.add_topic(&api, "t9", 3, 2).await.unwrap();
    assert!(log[0].contains("t9"));
    assert!(log[0].contains("partitions:3"));
}
