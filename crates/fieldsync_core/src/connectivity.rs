//! Network reachability signal.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared "is the network reachable" flag with transition notifications.
///
/// Cloning is cheap; every clone observes the same state. The platform layer
/// calls [`set_online`](Self::set_online) as reachability changes.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Creates a signal with an initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Returns true if the network is currently reachable.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Updates the state. Subscribers are only woken on an actual transition.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Subscribes to transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_wake_subscribers() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();
        assert!(!connectivity.is_online());

        connectivity.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn repeated_state_is_not_a_transition() {
        let connectivity = Connectivity::new(true);
        let rx = connectivity.subscribe();
        connectivity.set_online(true);
        assert!(!rx.has_changed().unwrap());

        let clone = connectivity.clone();
        clone.set_online(false);
        assert!(rx.has_changed().unwrap());
        assert!(!connectivity.is_online());
    }
}
