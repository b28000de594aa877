//! Single-shot stop signal shared between the orchestrator and its processors
//!
//! Firing never blocks and can be repeated; listeners created before or after
//! the signal fired all observe it.

use tokio::sync::watch;

/// Owning side of a stop signal
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Request a stop. Non-blocking and idempotent.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> StopListener {
        StopListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a stop signal
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopListener {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fired. A dropped [`StopSignal`] counts as fired.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listener_sees_fire() {
        let signal = StopSignal::new();
        let mut listener = signal.listener();
        assert!(!listener.is_stopped());

        signal.fire();
        signal.fire();

        tokio::time::timeout(Duration::from_secs(1), listener.stopped())
            .await
            .unwrap();
        assert!(listener.is_stopped());
    }

    #[tokio::test]
    async fn test_late_listener_sees_earlier_fire() {
        let signal = StopSignal::new();
        signal.fire();

        let mut listener = signal.listener();
        tokio::time::timeout(Duration::from_secs(1), listener.stopped())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_signal_releases_listener() {
        let signal = StopSignal::new();
        let mut listener = signal.listener();
        drop(signal);

        tokio::time::timeout(Duration::from_secs(1), listener.stopped())
            .await
            .unwrap();
    }
}
