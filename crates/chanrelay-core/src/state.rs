use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Per-connection subscription state shared between the connection's task
/// and anything holding a handle to it.
///
/// This is the access-control policy of the relay: a delivery is visible to
/// a connection only if [`accepts`](Self::accepts) says so. Monitor mode
/// bypasses the subscription check entirely.
#[derive(Debug, Default)]
pub struct ConnState {
    channels: Mutex<HashSet<String>>,
    monitor: AtomicBool,
}

impl ConnState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel subscription. Idempotent.
    pub fn subscribe(&self, channel: &str) {
        self.channels
            .lock()
            .expect("subscription set poisoned")
            .insert(channel.to_string());
    }

    /// Remove a channel subscription. A no-op when not subscribed.
    pub fn unsubscribe(&self, channel: &str) {
        self.channels
            .lock()
            .expect("subscription set poisoned")
            .remove(channel);
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels
            .lock()
            .expect("subscription set poisoned")
            .contains(channel)
    }

    /// Number of distinct subscribed channels.
    pub fn subscription_count(&self) -> usize {
        self.channels.lock().expect("subscription set poisoned").len()
    }

    pub fn set_monitor(&self, monitor: bool) {
        self.monitor.store(monitor, Ordering::Relaxed);
    }

    pub fn is_monitor(&self) -> bool {
        self.monitor.load(Ordering::Relaxed)
    }

    /// Whether a delivery on `channel` is visible to this connection.
    pub fn accepts(&self, channel: &str) -> bool {
        self.is_monitor() || self.is_subscribed(channel)
    }
}
