//! Counter store abstraction shared by the Redis and in-memory backends.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::rate_limit_config::BucketConfig;

/// Entry state observed right after an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    /// Points consumed in the current window, including this call
    pub consumed: u64,
    /// Milliseconds until the entry expires (window end or block end, whichever is later)
    pub ms_before_next: u64,
}

impl CounterState {
    pub fn exceeds(&self, config: &BucketConfig) -> bool {
        self.consumed > config.points
    }

    pub fn remaining(&self, config: &BucketConfig) -> u64 {
        config.points.saturating_sub(self.consumed)
    }
}

/// Atomic increment-with-expiry store.
///
/// `consume` must be linearizable per key: two concurrent calls on the same key
/// never observe the same `consumed` value. On the first increment past
/// `config.points` the entry lifetime is extended to `config.block_duration`
/// when that is longer than what remains of the window.
#[async_trait]
pub trait AtomicCounterStore: Send + Sync {
    async fn consume(&self, key: &str, config: &BucketConfig) -> Result<CounterState>;

    /// Time left before the entry expires, `None` if it does not exist.
    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}
