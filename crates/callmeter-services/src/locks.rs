//! Keyed async locks
//!
//! One `tokio::sync::Mutex` per key, created on first use and evicted once the
//! last holder or waiter is gone. Used for the per-organization balance lock
//! and the per-session lifecycle lock.

use callmeter_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

type Registry = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Registry of named mutexes
pub struct KeyedLocks {
    name: &'static str,
    entries: Arc<Registry>,
    timeout: Duration,
}

impl KeyedLocks {
    /// `name` prefixes lock keys in errors and logs (e.g. `org`, `session`)
    pub fn new(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Wait for exclusive access to `key`, up to the configured timeout
    pub async fn acquire(&self, key: &str) -> AppResult<KeyedGuard> {
        let entry = {
            let mut entries = self.entries.lock();
            entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let acquired = tokio::time::timeout(self.timeout, entry.clone().lock_owned()).await;

        // A timed-out waiter is dropped through the same path, evicting the entry
        let mut pending = KeyedGuard {
            key: key.to_string(),
            entries: self.entries.clone(),
            entry: Some(entry),
            guard: None,
        };

        match acquired {
            Ok(guard) => {
                pending.guard = Some(guard);
                Ok(pending)
            }
            Err(_) => {
                let key = format!("{}:{}", self.name, key);
                warn!(lock = %key, timeout_ms = self.timeout.as_millis() as u64, "Lock wait timed out");
                Err(AppError::ConcurrentMutationTimeout { key })
            }
        }
    }

    /// Number of keys currently tracked
    pub fn tracked(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Exclusive access to one key; released on drop
#[derive(Debug)]
pub struct KeyedGuard {
    key: String,
    entries: Arc<Registry>,
    entry: Option<Arc<AsyncMutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release the mutex before inspecting the refcount
        self.guard.take();

        let mut entries = self.entries.lock();
        if let Some(entry) = self.entry.take() {
            // Registry + this handle means nobody else holds or waits
            if Arc::strong_count(&entry) <= 2 {
                if let Some(current) = entries.get(&self.key) {
                    if Arc::ptr_eq(current, &entry) {
                        entries.remove(&self.key);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_entries_are_evicted() {
        let locks = KeyedLocks::new("org", Duration::from_millis(100));

        {
            let _a = locks.acquire("org-1").await.unwrap();
            let _b = locks.acquire("org-2").await.unwrap();
            assert_eq!(locks.tracked(), 2);
        }

        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let locks = KeyedLocks::new("session", Duration::from_millis(20));
        let _held = locks.acquire("call-1").await.unwrap();

        let err = locks.acquire("call-1").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            AppError::ConcurrentMutationTimeout { ref key } if key == "session:call-1"
        ));
    }

    #[tokio::test]
    async fn test_timed_out_waiter_does_not_leak() {
        let locks = KeyedLocks::new("org", Duration::from_millis(10));
        {
            let _held = locks.acquire("org-1").await.unwrap();
            let _ = locks.acquire("org-1").await;
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion() {
        let locks = Arc::new(KeyedLocks::new("org", Duration::from_secs(5)));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                tokio::spawn(async move {
                    let _guard = locks.acquire("org-1").await.unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.tracked(), 0);
    }
}
