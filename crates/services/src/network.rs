use tokio::sync::watch;

/// Connectivity status source.
///
/// This is the only component allowed to originate online/offline
/// transitions; everything else holds a read-only [`ConnectivityHandle`].
/// Binding to a runtime event source (or flipping it by hand in tests) is
/// the embedder's job.
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    /// Publish a connectivity transition. Repeating the current state is
    /// not broadcast as a change.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|state| {
            let changed = *state != online;
            *state = online;
            changed
        });
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Read-only view handed to consumers.
    #[must_use]
    pub fn handle(&self) -> ConnectivityHandle {
        ConnectivityHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Read-only subscription to connectivity state.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    rx: watch::Receiver<bool>,
}

impl ConnectivityHandle {
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next transition and return the new state.
    ///
    /// Returns `None` once the monitor has been dropped.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_observes_transitions() {
        let monitor = NetworkMonitor::new(false);
        let mut handle = monitor.handle();
        assert!(!handle.is_online());

        monitor.set_online(true);
        assert_eq!(handle.changed().await, Some(true));
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn repeated_state_is_not_a_transition() {
        let monitor = NetworkMonitor::new(true);
        let mut handle = monitor.handle();

        monitor.set_online(true);
        monitor.set_online(false);
        // only the actual flip is observed
        assert_eq!(handle.changed().await, Some(false));
    }

    #[tokio::test]
    async fn changed_ends_when_monitor_drops() {
        let monitor = NetworkMonitor::new(true);
        let mut handle = monitor.handle();
        drop(monitor);
        assert_eq!(handle.changed().await, None);
    }
}
