// src/exec/cancel.rs

//! Best-effort cancellation signal shared between the coordinator and a
//! worker.
//!
//! Built on `tokio::sync::watch` rather than `oneshot` so a worker can wait on
//! it across several sequential stage invocations.

use tokio::sync::watch;

/// Sending half, held by the coordinator for each running job.
#[derive(Debug)]
pub struct CancelTrigger {
    tx: watch::Sender<bool>,
}

impl CancelTrigger {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, moved into the worker.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation was requested. If the trigger is dropped
    /// without firing, this never resolves.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                if *self.rx.borrow() {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancel_pair() -> (CancelTrigger, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger { tx }, CancelSignal { rx })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn fires_after_trigger() {
        let (trigger, mut signal) = cancel_pair();
        assert!(!signal.is_cancelled());
        trigger.cancel();
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("signal should resolve");
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn never_signal_stays_pending() {
        let mut signal = CancelSignal::never();
        let res = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(res.is_err());
    }
}
