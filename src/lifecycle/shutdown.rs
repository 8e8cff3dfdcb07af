//! Shutdown coordination for the config watcher and the Vault token
//! renewal task.

use tokio::sync::broadcast;

/// Stops the background tasks started by `ConfigService`.
///
/// `ConfigService::start` subscribes the watcher and `bootstrap` subscribes
/// the token renewal loop. Both leave their loop on the first signal: the
/// watcher drops its change sender, so the application sees the change
/// channel close.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signals every subscribed task. A task subscribed afterwards never sees
    /// it, so start the service before calling this.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of background tasks still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.clone().subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        shutdown.trigger();
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }
}
