//! Cooperative shutdown signal shared by timers, consume loops and live
//! connections.

use tokio::sync::watch;

/// Sending half. Dropping it also counts as a shutdown.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half, cloned into every background task.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

/// Creates a connected trigger/signal pair.
#[must_use]
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    /// Signals every receiver to stop.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Returns a new receiver bound to this trigger.
    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    /// Resolves once shutdown has been requested. Cancel-safe.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Returns `true` if shutdown has already been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_waiters() {
        let (trigger, mut signal) = channel();
        let mut other = trigger.signal();
        assert!(!signal.is_cancelled());

        trigger.trigger();
        signal.cancelled().await;
        other.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn pending_until_triggered() {
        let (_trigger, mut signal) = channel();
        let mut fut = tokio_test::task::spawn(async move { signal.cancelled().await });
        tokio_test::assert_pending!(fut.poll());
    }
}
