//! Change notification channels.
//!
//! Both channels are `watch` based: subscribers see the latest value, not
//! every intermediate one.

use tokio::sync::watch;

/// Publishes the display state "which task is being timed".
///
/// `None` means nothing is being timed.
#[derive(Debug)]
pub struct TimingObserver {
    tx: watch::Sender<Option<String>>,
}

impl TimingObserver {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Replace the published value. Works with or without subscribers.
    pub fn publish(&self, task_name: Option<String>) {
        self.tx.send_replace(task_name);
    }

    /// The most recently published value.
    pub fn latest(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Start receiving updates. Dropping the subscription unsubscribes.
    pub fn subscribe(&self) -> TimingSubscription {
        TimingSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for TimingObserver {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer handle on a [`TimingObserver`].
#[derive(Debug, Clone)]
pub struct TimingSubscription {
    rx: watch::Receiver<Option<String>>,
}

impl TimingSubscription {
    /// The current value, marking it as seen.
    pub fn current(&mut self) -> Option<String> {
        self.rx.borrow_and_update().clone()
    }

    /// Whether a value was published since the last [`current`](Self::current).
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Wait for the next publish and return the latest value.
    /// Returns `None` once the producer is gone.
    pub async fn changed(&mut self) -> Option<Option<String>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Version counter bumped by a store whenever its contents change.
#[derive(Debug)]
pub struct ChangeFeed {
    tx: watch::Sender<u64>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    pub fn notify(&self) {
        self.tx.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.tx.borrow()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
