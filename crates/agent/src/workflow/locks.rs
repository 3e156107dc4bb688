use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use cadence_core::domain::conversation::ThreadKey;

/// Keyed mutual exclusion: runs for one thread queue behind each other while
/// different threads proceed independently.
#[derive(Default)]
pub struct ThreadLocks {
    slots: Mutex<HashMap<ThreadKey, Arc<Mutex<()>>>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `thread_key`; released when the guard drops.
    pub async fn acquire(&self, thread_key: &ThreadKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            // Drop slots nobody holds or waits on.
            slots.retain(|key, slot| key == thread_key || Arc::strong_count(slot) > 1);
            slots.entry(thread_key.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    pub async fn tracked(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cadence_core::domain::conversation::ThreadKey;

    use super::ThreadLocks;

    #[tokio::test]
    async fn same_key_waits_and_other_keys_do_not() {
        let locks = Arc::new(ThreadLocks::new());
        let alice = ThreadKey("user_1".to_string());
        let bob = ThreadKey("user_2".to_string());

        let held = locks.acquire(&alice).await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&bob)).await;
        assert!(other.is_ok(), "different thread must not block");

        let same = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&alice)).await;
        assert!(same.is_err(), "same thread must wait for the holder");

        drop(held);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(&alice)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn idle_slots_are_pruned() {
        let locks = ThreadLocks::new();
        for index in 0..5 {
            let guard = locks.acquire(&ThreadKey(format!("user_{index}"))).await;
            drop(guard);
        }
        assert_eq!(locks.tracked().await, 1);
    }
}
