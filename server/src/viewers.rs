//! Registry of push-mode connections that receive every broadcast.
//!
//! Each registered connection is represented by the sending half of a bounded
//! queue; the connection's own task drains the queue into its socket. A viewer
//! whose queue stays full for longer than the send timeout, or whose task has
//! gone away, is evicted during the broadcast that noticed it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub type ViewerId = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub targets: usize,
    pub delivered: usize,
    pub evicted: usize,
}

pub struct ViewerRegistry<T> {
    name: &'static str,
    viewers: Mutex<HashMap<ViewerId, mpsc::Sender<T>>>,
    next_id: AtomicU64,
    queue_depth: usize,
    send_timeout: Duration,
}

impl<T: Clone + Send + 'static> ViewerRegistry<T> {
    pub fn new(name: &'static str, queue_depth: usize, send_timeout: Duration) -> Self {
        Self {
            name,
            viewers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
            send_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ViewerId, mpsc::Sender<T>>> {
        self.viewers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a viewer to the broadcast set.
    pub fn register(&self, sender: mpsc::Sender<T>) -> ViewerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut viewers = self.lock();
            viewers.insert(id, sender);
            viewers.len()
        };
        info!(registry = self.name, viewer = id, count, "viewer registered");
        id
    }

    /// Remove a viewer. Removing an unknown or already evicted id is a no-op.
    pub fn unregister(&self, id: ViewerId) {
        let removed = {
            let mut viewers = self.lock();
            viewers.remove(&id).map(|_| viewers.len())
        };
        if let Some(count) = removed {
            info!(registry = self.name, viewer = id, count, "viewer unregistered");
        }
    }

    /// Register a fresh queue and return the receiving side. The viewer is
    /// unregistered when the returned subscription is dropped.
    pub fn subscribe(self: &Arc<Self>) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = self.register(tx);
        Subscription {
            id,
            rx,
            registry: Arc::clone(self),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Deliver `message` to every registered viewer concurrently, evicting
    /// those whose send fails or times out. Viewers registered while the
    /// broadcast is in flight may miss this message.
    pub async fn broadcast(&self, message: T) -> BroadcastReport {
        let targets: Vec<(ViewerId, mpsc::Sender<T>)> = self
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let timeout = self.send_timeout;
        let sends = targets.into_iter().map(|(id, tx)| {
            let message = message.clone();
            async move { (id, tx.send_timeout(message, timeout).await.is_ok()) }
        });
        let results = join_all(sends).await;

        let mut report = BroadcastReport {
            targets: results.len(),
            ..Default::default()
        };
        let dead: Vec<ViewerId> = results
            .into_iter()
            .filter_map(|(id, ok)| {
                if ok {
                    report.delivered += 1;
                    None
                } else {
                    Some(id)
                }
            })
            .collect();

        if !dead.is_empty() {
            let mut viewers = self.lock();
            for id in &dead {
                if viewers.remove(id).is_some() {
                    report.evicted += 1;
                }
            }
            debug!(
                registry = self.name,
                evicted = report.evicted,
                remaining = viewers.len(),
                "evicted unresponsive viewers"
            );
        }
        report
    }
}

/// Receiving side of a registered viewer.
pub struct Subscription<T: Clone + Send + 'static> {
    id: ViewerId,
    rx: mpsc::Receiver<T>,
    registry: Arc<ViewerRegistry<T>>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Next broadcast message. `None` once the registry has evicted this viewer.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T: Clone + Send + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
