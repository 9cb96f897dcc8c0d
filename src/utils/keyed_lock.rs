use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key, created on first use. Keys nobody holds or waits
/// on are dropped on the next `lock` call.
#[derive(Debug, Default)]
pub struct KeyedLock {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLock::new());
        let guard = locks.lock("a").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("released")
            .expect("join");
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLock::new();
        let _a = locks.lock("a").await;
        tokio::time::timeout(Duration::from_millis(200), locks.lock("b"))
            .await
            .expect("independent key");
    }

    #[tokio::test]
    async fn released_keys_are_pruned() {
        let locks = KeyedLock::new();
        for i in 0..50 {
            drop(locks.lock(&format!("https://org{i}.example.jp/")).await);
        }
        let held = locks.lock("held").await;
        assert_eq!(locks.len(), 1);

        drop(locks.lock("other").await);
        assert_eq!(locks.len(), 2);
        drop(held);
        drop(locks.lock("last").await);
        assert_eq!(locks.len(), 1);
    }
}
