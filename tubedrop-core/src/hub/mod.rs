//! Fan-out of job notifications to live subscribers.
//!
//! Every subscriber owns a bounded buffer. Publishing never waits: a subscriber whose buffer is
//! full, or whose receiving side is gone, is removed on the spot and the others still get the
//! notification.

use crate::model::Notification;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default buffer capacity of a subscription.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Notification>,
}

/// Broadcaster for job notifications.
///
/// Cloning a hub yields another handle on the same subscriber set.
#[derive(Clone)]
pub struct NotificationHub {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    /// Create a new hub with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new hub whose subscribers buffer up to `capacity` notifications.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            capacity: capacity.max(1),
        }
    }

    /// Joins the hub. Only notifications published from now on are received.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber { id, tx });

        #[cfg(feature = "tracing")]
        tracing::debug!("Subscriber {} joined", id);

        Subscription { id, rx }
    }

    /// Delivers `notification` to every live subscriber and returns how many received it.
    pub fn publish(&self, notification: Notification) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;

        subscribers.retain(|subscriber| {
            match subscriber.tx.try_send(notification.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Dropping lagging subscriber {}", subscriber.id);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Subscriber {} left", subscriber.id);
                    false
                }
            }
        });

        delivered
    }

    /// The number of subscribers currently registered.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// A live connection to a [`NotificationHub`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Notification>,
}

impl Subscription {
    /// The identifier of this subscription, unique within its hub.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next notification.
    ///
    /// Returns `None` once the hub has dropped this subscriber, either because it lagged behind or
    /// because the hub itself is gone, and every buffered notification has been received.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Returns a buffered notification without waiting.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}
