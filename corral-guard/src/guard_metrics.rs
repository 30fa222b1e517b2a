use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

pub(crate) struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub(crate) const GAUGES: [Metric; 15] = [
    BROKERS_DEAD,
    BROKERS_UNREGISTERED,
    CONTROLLER_JITTER,
    CONTROLLER_EPOCH_ANOMALY,
    PARTITIONS_DEAD,
    PARTITIONS_OUT_OF_SYNC,
    PARTITIONS_BAD_REPLICA,
    CONSUMER_GROUPS_ONLINE,
    CONSUMER_GROUPS_OFFLINE,
    ACTORS_REGISTERED,
    JOB_QUEUES,
    JOB_QUEUES_ORPHANED,
    SUB_LAG_GROUPS,
    SUB_CONFLICT_GROUPS,
    LEADER_STATE,
];

// BROKER watcher --------------------------

pub(crate) const BROKERS_DEAD: Metric = Metric {
    name: "corral_brokers_dead",
    description: "Rostered brokers whose ephemeral registration is gone",
};

pub(crate) const BROKERS_UNREGISTERED: Metric = Metric {
    name: "corral_brokers_unregistered",
    description: "Live brokers missing from the cluster roster",
};

// CONTROLLER watcher --------------------------

pub(crate) const CONTROLLER_JITTER: Metric = Metric {
    name: "corral_controller_jitter",
    description: "Clusters whose controller changed since the last round",
};

pub(crate) const CONTROLLER_EPOCH_ANOMALY: Metric = Metric {
    name: "corral_controller_epoch_anomaly",
    description: "Controller epoch regressions observed (epoch must be monotonic)",
};

// REPLICA watcher --------------------------

pub(crate) const PARTITIONS_DEAD: Metric = Metric {
    name: "corral_partitions_dead",
    description: "Topics with fewer writable partitions than total partitions",
};

pub(crate) const PARTITIONS_OUT_OF_SYNC: Metric = Metric {
    name: "corral_partitions_out_of_sync",
    description: "Partitions whose ISR differs in size from the replica set",
};

pub(crate) const PARTITIONS_BAD_REPLICA: Metric = Metric {
    name: "corral_partitions_bad_replica",
    description: "Partitions whose replica state could not be read",
};

// CONSUMER watcher --------------------------

pub(crate) const CONSUMER_GROUPS_ONLINE: Metric = Metric {
    name: "corral_consumer_groups_online",
    description: "Consumer groups with at least one live member",
};

pub(crate) const CONSUMER_GROUPS_OFFLINE: Metric = Metric {
    name: "corral_consumer_groups_offline",
    description: "Consumer groups with zero live members",
};

// ACTOR watcher --------------------------

pub(crate) const ACTORS_REGISTERED: Metric = Metric {
    name: "corral_actors_registered",
    description: "Actors currently registered in the zone",
};

pub(crate) const JOB_QUEUES: Metric = Metric {
    name: "corral_job_queues",
    description: "Registered job queues",
};

pub(crate) const JOB_QUEUES_ORPHANED: Metric = Metric {
    name: "corral_job_queues_orphaned",
    description: "Job queues with no owning actor claim",
};

// SUB watcher --------------------------

pub(crate) const SUB_LAG_GROUPS: Metric = Metric {
    name: "corral_sub_lag_groups",
    description: "Partitions with a confirmed stuck consumer this round",
};

pub(crate) const SUB_CONFLICT_GROUPS: Metric = Metric {
    name: "corral_sub_conflict_groups",
    description: "Groups subscribing to more than one topic",
};

// MONITOR --------------------------

pub(crate) const LEADER_STATE: Metric = Metric {
    name: "corral_leader_state",
    description: "Leadership state of this guard (0=follower,1=leader)",
};

pub(crate) fn init_metrics(prom_addr: Option<std::net::SocketAddr>) {
    info!("initializing metrics exporter");

    if let Some(addr) = prom_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("failed to install Prometheus recorder");
    }

    for metric in GAUGES {
        register_gauge(metric)
    }
}

/// Registers a gauge with the given name.
fn register_gauge(metric: Metric) {
    metrics::describe_gauge!(metric.name, metric.description);
    let _gauge = metrics::gauge!(metric.name);
}
