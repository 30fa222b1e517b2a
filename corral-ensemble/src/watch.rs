use futures::stream::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::errors::{EnsembleError, Result};

/// Depth of the snapshot delivery queue between the watch task and the
/// consumer. A consumer slower than the change rate loses the oldest unread
/// snapshots, never the newest.
pub const WATCH_QUEUE_DEPTH: usize = 10;

/// A subscription to children changes of one node.
///
/// A background task owned by the provider blocks on the ensemble's one-shot
/// watch, re-arms it after every fire, and pushes the fresh child-name list
/// into a bounded queue. Delivery is eventual: intermediate lists may be
/// superseded before the consumer reads them. The subscription ends (and
/// [`ChildrenWatch::changed`] returns `WatchChannelClosed`) when the watched
/// node disappears or the session is lost. There is no automatic
/// re-subscription; callers reconnect and subscribe again.
pub struct ChildrenWatch {
    rx: broadcast::Receiver<Vec<String>>,
}

impl ChildrenWatch {
    pub(crate) fn new(rx: broadcast::Receiver<Vec<String>>) -> Self {
        Self { rx }
    }

    /// Next child-name snapshot.
    pub async fn changed(&mut self) -> Result<Vec<String>> {
        loop {
            match self.rx.recv().await {
                Ok(children) => return Ok(children),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(superseded = n, "slow children-watch consumer, oldest snapshots dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EnsembleError::WatchChannelClosed)
                }
            }
        }
    }

    /// Stream view over the same queue. Lagged gaps are collapsed silently.
    pub fn into_stream(self) -> impl Stream<Item = Vec<String>> {
        use futures::StreamExt;
        BroadcastStream::new(self.rx).filter_map(|item| async move {
            match item {
                Ok(children) => Some(children),
                Err(BroadcastStreamRecvError::Lagged(_)) => None,
            }
        })
    }
}

/// Producer half used by the providers.
pub(crate) fn watch_channel() -> (broadcast::Sender<Vec<String>>, ChildrenWatch) {
    let (tx, rx) = broadcast::channel(WATCH_QUEUE_DEPTH);
    (tx, ChildrenWatch::new(rx))
}
