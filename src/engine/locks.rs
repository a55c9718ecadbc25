use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

const PRUNE_THRESHOLD: usize = 1024;

/// Per-entity critical sections for read-modify-write against the store.
///
/// Nested scopes always acquire in the order booking, driver, transaction,
/// wallet. Wallet keys taken together go through [`KeyedLocks::lock_all`].
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub fn booking_key(id: &Uuid) -> String {
    format!("booking:{}", id)
}

pub fn driver_key(id: &Uuid) -> String {
    format!("driver:{}", id)
}

pub fn transaction_key(id: &Uuid) -> String {
    format!("txn:{}", id)
}

pub fn wallet_key(wallet: &str) -> String {
    format!("wallet:{}", wallet)
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if locks.len() > PRUNE_THRESHOLD {
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        }

        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }

    /// Sorted and deduplicated so concurrent callers cannot deadlock.
    pub async fn lock_all(&self, keys: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(&key).await);
        }

        guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("booking:1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("booking:1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("wallet:a").await;
        let _b = locks.lock("wallet:b").await;
    }

    #[tokio::test]
    async fn lock_all_dedups_keys() {
        let locks = KeyedLocks::new();
        let guards = locks
            .lock_all(&["wallet:b".to_string(), "wallet:a".to_string(), "wallet:b".to_string()])
            .await;

        assert_eq!(guards.len(), 2);
    }
}
