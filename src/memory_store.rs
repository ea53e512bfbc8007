use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::rate_limit_config::BucketConfig;
use crate::store::{AtomicCounterStore, CounterState};

/// Process-local counter state for one key
#[derive(Debug, Clone)]
struct LocalEntry {
    consumed: u64,
    window_expires_at: u64,
    blocked_until: Option<u64>,
}

impl LocalEntry {
    fn fresh(now: u64, config: &BucketConfig) -> Self {
        Self {
            consumed: 0,
            window_expires_at: now + config.window_ms(),
            blocked_until: None,
        }
    }

    fn expires_at(&self) -> u64 {
        self.blocked_until
            .map_or(self.window_expires_at, |until| until.max(self.window_expires_at))
    }
}

/// In-memory fallback store.
///
/// All entries live behind one mutex, which serializes increments per key.
/// Expired entries are replaced lazily on access and swept by `prune_expired`.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, LocalEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, LocalEntry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire lock on local counters".to_string()))
    }

    /// Drop entries whose window and block have both elapsed.
    pub fn prune_expired(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        let mut entries = self.lock()?;
        let initial_count = entries.len();
        entries.retain(|_, entry| entry.expires_at() > now);
        Ok(initial_count - entries.len())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AtomicCounterStore for MemoryStore {
    async fn consume(&self, key: &str, config: &BucketConfig) -> Result<CounterState> {
        let now = self.clock.now_ms();
        let mut entries = self.lock()?;

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| LocalEntry::fresh(now, config));
        if entry.expires_at() <= now {
            *entry = LocalEntry::fresh(now, config);
        }

        entry.consumed = entry.consumed.saturating_add(1);
        if entry.consumed == config.points + 1 && config.has_block() {
            entry.blocked_until = Some(now + config.block_ms());
        }

        Ok(CounterState {
            consumed: entry.consumed,
            ms_before_next: entry.expires_at().saturating_sub(now),
        })
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = self.clock.now_ms();
        let entries = self.lock()?;
        Ok(entries
            .get(key)
            .map(LocalEntry::expires_at)
            .filter(|expires_at| *expires_at > now)
            .map(|expires_at| Duration::from_millis(expires_at - now)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_counts_within_window() {
        let (store, _) = store_with_clock();
        let config = BucketConfig::new("t", 3, Duration::from_secs(60), Duration::ZERO);

        for expected in 1..=4 {
            let state = store.consume("t:a", &config).await.unwrap();
            assert_eq!(state.consumed, expected);
            assert_eq!(state.ms_before_next, 60_000);
        }
    }

    #[tokio::test]
    async fn test_window_expiry_resets_counter() {
        let (store, clock) = store_with_clock();
        let config = BucketConfig::new("t", 1, Duration::from_secs(10), Duration::ZERO);

        store.consume("t:a", &config).await.unwrap();
        clock.advance(Duration::from_secs(10));

        let state = store.consume("t:a", &config).await.unwrap();
        assert_eq!(state.consumed, 1);
    }

    #[tokio::test]
    async fn test_block_extends_past_window() {
        let (store, clock) = store_with_clock();
        let config = BucketConfig::new("t", 1, Duration::from_secs(10), Duration::from_secs(60));

        store.consume("t:a", &config).await.unwrap();
        clock.advance(Duration::from_secs(5));
        let blocked = store.consume("t:a", &config).await.unwrap();
        assert_eq!(blocked.consumed, 2);
        assert_eq!(blocked.ms_before_next, 60_000);

        // window alone would have ended here
        clock.advance(Duration::from_secs(30));
        let still_blocked = store.consume("t:a", &config).await.unwrap();
        assert!(still_blocked.exceeds(&config));
        assert_eq!(still_blocked.ms_before_next, 30_000);

        clock.advance(Duration::from_secs(30));
        let fresh = store.consume("t:a", &config).await.unwrap();
        assert_eq!(fresh.consumed, 1);
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let (store, clock) = store_with_clock();
        let short = BucketConfig::new("s", 5, Duration::from_secs(1), Duration::ZERO);
        let long = BucketConfig::new("l", 5, Duration::from_secs(100), Duration::ZERO);

        store.consume("s:a", &short).await.unwrap();
        store.consume("l:a", &long).await.unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(store.prune_expired().unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.remaining_ttl("s:a").await.unwrap().is_none());
        assert_eq!(
            store.remaining_ttl("l:a").await.unwrap(),
            Some(Duration::from_secs(98))
        );
    }

    #[tokio::test]
    async fn test_concurrent_consumers_never_share_a_count() {
        let store = Arc::new(MemoryStore::new());
        let config = BucketConfig::new("c", 1000, Duration::from_secs(60), Duration::ZERO);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            let config = config.clone();
            handles.push(tokio::spawn(async move {
                store.consume("c:shared", &config).await.unwrap().consumed
            }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=50).collect::<Vec<u64>>());
    }
}
