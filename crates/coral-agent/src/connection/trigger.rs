//! A wake-up signal for the reconnection loop (spec §9): bounded to a single
//! pending notification, and `fire` never blocks the caller.

use tokio::sync::mpsc;

/// The sending half. Cheap to clone; every clone shares the same slot.
#[derive(Clone)]
pub struct Trigger {
    tx: mpsc::Sender<()>,
}

impl Trigger {
    /// Wakes the paired [`TriggerListener`] immediately. If a wake-up is
    /// already pending, this is a no-op rather than a block — the loop only
    /// needs to know "something changed", not how many times.
    pub fn fire(&self) {
        let _ = self.tx.try_send(());
    }
}

/// The receiving half, held by the loop that waits on it.
pub struct TriggerListener {
    rx: mpsc::Receiver<()>,
}

impl TriggerListener {
    /// Resolves as soon as [`Trigger::fire`] is called, or immediately if a
    /// firing is already pending.
    pub async fn notified(&mut self) {
        self.rx.recv().await;
    }
}

/// Creates a linked `(Trigger, TriggerListener)` pair with capacity 1.
#[must_use]
pub fn channel() -> (Trigger, TriggerListener) {
    let (tx, rx) = mpsc::channel(1);
    (Trigger { tx }, TriggerListener { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fire_before_wait_is_not_lost() {
        let (trigger, mut listener) = channel();
        trigger.fire();
        tokio::time::timeout(Duration::from_millis(50), listener.notified())
            .await
            .expect("trigger should already be pending");
    }

    #[tokio::test]
    async fn repeated_fires_coalesce_into_one_wakeup() {
        let (trigger, mut listener) = channel();
        trigger.fire();
        trigger.fire();
        trigger.fire();
        listener.notified().await;
        // The queued second/third fires must not still be pending after one
        // `notified()` drains the single slot.
        let result = tokio::time::timeout(Duration::from_millis(20), listener.notified()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fire_does_not_block_without_a_waiting_listener() {
        let (trigger, _listener) = channel();
        trigger.fire();
        trigger.fire();
        trigger.fire();
    }

    #[tokio::test]
    async fn clone_shares_the_same_slot() {
        let (trigger, mut listener) = channel();
        let other = trigger.clone();
        other.fire();
        tokio::time::timeout(Duration::from_millis(50), listener.notified()).await.expect("shared slot fires");
    }
}
