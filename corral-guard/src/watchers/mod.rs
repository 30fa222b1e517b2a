use std::sync::Arc;

use async_trait::async_trait;
use corral_zone::Zone;
use tokio_util::sync::CancellationToken;

use crate::service_configuration::GuardConfiguration;

pub(crate) mod actor;
pub(crate) mod broker;
pub(crate) mod consumer;
pub(crate) mod controller;
pub(crate) mod replica;
pub(crate) mod sub;

/// Everything a watcher gets injected at start: the zone handle, the shared
/// stop signal, and the guard configuration knobs.
pub(crate) struct Context {
    pub(crate) zone: Zone,
    pub(crate) stop: CancellationToken,
    pub(crate) config: Arc<GuardConfiguration>,
}

/// A periodic monitor plugin. Each instance owns its ticker at a self-chosen
/// interval and performs one poll-and-report cycle per tick; a failed poll is
/// logged and skipped, never terminates the loop. The stop signal is observed
/// cooperatively at the next suspension point.
#[async_trait]
pub(crate) trait Watcher: Send {
    fn init(&mut self, ctx: &Context);
    async fn run(self: Box<Self>);
}

pub(crate) type WatcherFactory = fn() -> Box<dyn Watcher>;

/// The built-in watcher set. The registry is plain data owned by the caller;
/// every entry produces a fresh, independently-owned instance per election
/// win.
pub(crate) fn default_watchers() -> Vec<(&'static str, WatcherFactory)> {
    vec![
        ("kafka.broker", broker::factory),
        ("kafka.controller", controller::factory),
        ("kafka.replica", replica::factory),
        ("kafka.consumer", consumer::factory),
        ("pubsub.actor", actor::factory),
        ("kateway.sub", sub::factory),
    ]
}
