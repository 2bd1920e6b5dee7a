//! Registry of `configurationUpdated` listeners.
//!
//! Every subscriber gets its own unbounded channel; publishing never blocks
//! the writer. Receivers that have been dropped are pruned on the next publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chainwatch_core::Configuration;
use tokio::sync::mpsc;

/// Handle returned by [`SubscriberRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Default)]
pub struct SubscriberRegistry {
    entries: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<Configuration>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Configuration>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    /// Returns `true` if `id` was registered.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.entries.lock().unwrap().remove(&id).is_some()
    }

    /// Send a copy of `config` to every live subscriber.
    /// Returns the number of subscribers reached.
    pub fn publish(&self, config: &Configuration) -> usize {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|id, tx| {
            let alive = tx.send(config.clone()).is_ok();
            if !alive {
                tracing::debug!(subscription = %id, "dropping closed subscriber");
            }
            alive
        });
        entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_subscriber() {
        let reg = SubscriberRegistry::new();
        let (_, mut a) = reg.register();
        let (_, mut b) = reg.register();

        let cfg = Configuration::new(4, vec![]);
        assert_eq!(reg.publish(&cfg), 2);
        assert_eq!(a.try_recv().unwrap().delay_blocks, 4);
        assert_eq!(b.try_recv().unwrap().delay_blocks, 4);
    }

    #[test]
    fn remove_and_prune() {
        let reg = SubscriberRegistry::new();
        let (a, _rx_a) = reg.register();
        let (b, rx_b) = reg.register();
        assert_ne!(a, b);
        assert!(reg.remove(a));
        assert!(!reg.remove(a));

        drop(rx_b);
        assert_eq!(reg.publish(&Configuration::default()), 0);
        assert!(!reg.remove(b));
    }
}
