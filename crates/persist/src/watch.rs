//! Prefix watch fan-out shared by the persistence engines

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{WatchEvent, WatchStream};

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

/// Dispatches change notifications to registered prefix watchers
///
/// Watchers only see changes made after registration. Closed receivers are
/// dropped lazily on the next publish.
#[derive(Default)]
pub(crate) struct WatchHub {
    watchers: Mutex<Vec<Watcher>>,
}

impl WatchHub {
    pub(crate) fn register(&self, prefix: &str) -> WatchStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        rx
    }

    pub(crate) fn publish(&self, event: WatchEvent) {
        self.watchers.lock().retain(|watcher| {
            if !event.key.starts_with(&watcher.prefix) {
                return !watcher.tx.is_closed();
            }
            watcher.tx.send(event.clone()).is_ok()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WatchEventKind;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_watch_prefix_filtering() {
        let hub = WatchHub::default();
        let mut rx = hub.register("/a/");

        hub.publish(WatchEvent {
            kind: WatchEventKind::Put,
            key: "/b/key".to_string(),
            value: Bytes::new(),
        });
        hub.publish(WatchEvent {
            kind: WatchEventKind::Put,
            key: "/a/key".to_string(),
            value: Bytes::from_static(b"v"),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "/a/key");
        assert!(rx.try_recv().is_err());
    }
}
