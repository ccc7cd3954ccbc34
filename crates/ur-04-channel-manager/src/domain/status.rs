//! Liveness and sync signals shared between the manager and the sync loop.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Connection flag plus the one-shot "caught up with the chain" signal.
#[derive(Debug)]
pub struct SyncStatus {
    connected: AtomicBool,
    synced: watch::Sender<bool>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatus {
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            connected: AtomicBool::new(false),
            synced,
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Fire the sync signal. Later calls are no-ops.
    pub fn mark_synced(&self) {
        self.synced.send_if_modified(|synced| {
            let changed = !*synced;
            *synced = true;
            changed
        });
    }

    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the sync loop has reached the chain head once.
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        // Sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|synced| *synced).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_synced_wakes_up() {
        let status = Arc::new(SyncStatus::new());
        assert!(!status.is_synced());

        let waiter = {
            let status = status.clone();
            tokio::spawn(async move { status.wait_synced().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        status.mark_synced();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(status.is_synced());

        // Already synced: returns immediately
        status.wait_synced().await;
    }

    #[test]
    fn test_connected_flag() {
        let status = SyncStatus::new();
        assert!(!status.is_connected());
        status.set_connected(true);
        assert!(status.is_connected());
    }
}
