//! ShutdownSignal - one-shot stop request shared by every task loop.
//!
//! Built on a `watch` channel holding `Option<ShutdownReason>`. Only the first
//! trigger is accepted; later ones (a second fatal error, an operator stop
//! racing a fatal error) are ignored, so the supervisor sees exactly one
//! reason.

use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::TaskName;

/// Why the scheduler stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// `stop()` was called (operator, Ctrl-C).
    Requested,

    /// A task failed fatally.
    Fatal { task: TaskName, error: String },
}

impl ShutdownReason {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShutdownReason::Fatal { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Returns `false` if a reason was already set.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ShutdownReason>> {
        self.tx.subscribe()
    }

    /// Wait until a reason is set.
    pub async fn triggered(&self) -> ShutdownReason {
        let mut rx = self.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            // the sender lives as long as `self`
            if rx.changed().await.is_err() {
                return ShutdownReason::Requested;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_reason_wins() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        let fatal = ShutdownReason::Fatal {
            task: TaskName::new("watchdog"),
            error: "chain stalled".to_string(),
        };
        assert!(signal.trigger(fatal.clone()));
        assert!(!signal.trigger(ShutdownReason::Requested));
        assert_eq!(signal.reason(), Some(fatal));
    }

    #[tokio::test]
    async fn waiters_wake_on_trigger() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.triggered().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.trigger(ShutdownReason::Requested);

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Requested);
        assert!(!reason.is_fatal());
    }
}
