use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::health::{StoreEvent, StoreHealth};
use crate::key_generator::{KeyStrategy, RequestContext};
use crate::memory_store::MemoryStore;
use crate::metrics::{AdmissionCounters, AdmissionStats};
use crate::rate_limit_config::BucketConfig;
use crate::store::AtomicCounterStore;

/// A bucket bound to the store that was healthy when it was created.
#[derive(Clone)]
pub struct Bucket {
    inner: Arc<BucketInner>,
}

struct BucketInner {
    config: BucketConfig,
    store: Arc<dyn AtomicCounterStore>,
    external: bool,
    counters: AdmissionCounters,
}

impl Bucket {
    pub fn config(&self) -> &BucketConfig {
        &self.inner.config
    }

    pub fn name(&self) -> &str {
        &self.inner.config.key_prefix
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.store.backend_name()
    }

    pub fn is_external(&self) -> bool {
        self.inner.external
    }

    pub fn stats(&self) -> AdmissionStats {
        self.inner.counters.snapshot()
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.inner.config.key_prefix, key)
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("config", &self.inner.config)
            .field("backend", &self.backend_name())
            .finish()
    }
}

/// Successful consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsumeOutcome {
    pub remaining: u64,
    pub ms_before_next: u64,
}

/// Admission decision handed back to the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub key: String,
    pub remaining: u64,
    pub retry_after_secs: Option<u64>,
}

/// Bucket factory and admission checks.
///
/// The external store is only consulted while `health` reports it available.
/// A failing call on an externally bound bucket is answered by the local
/// store instead, so callers are only ever rejected for their own budget.
pub struct RateLimiter {
    external: Option<Arc<dyn AtomicCounterStore>>,
    local: Arc<MemoryStore>,
    health: Arc<StoreHealth>,
}

impl RateLimiter {
    pub fn new(
        external: Option<Arc<dyn AtomicCounterStore>>,
        local: Arc<MemoryStore>,
        health: Arc<StoreHealth>,
    ) -> Self {
        Self {
            external,
            local,
            health,
        }
    }

    pub fn health(&self) -> &Arc<StoreHealth> {
        &self.health
    }

    pub fn local_store(&self) -> &Arc<MemoryStore> {
        &self.local
    }

    /// Validate `config` and bind it to a backend. The binding is permanent.
    pub fn create_bucket(&self, config: BucketConfig) -> Result<Bucket> {
        config.check()?;

        let (store, external) = match &self.external {
            Some(store) if self.health.is_available() => (store.clone(), true),
            _ => (self.local.clone() as Arc<dyn AtomicCounterStore>, false),
        };

        tracing::info!(
            bucket = %config.key_prefix,
            points = config.points,
            duration = ?config.duration,
            block = ?config.block_duration,
            backend = store.backend_name(),
            "Rate limit bucket created"
        );

        Ok(Bucket {
            inner: Arc::new(BucketInner {
                config,
                store,
                external,
                counters: AdmissionCounters::default(),
            }),
        })
    }

    /// Charge one point to `key` in `bucket`.
    pub async fn consume(&self, bucket: &Bucket, key: &str) -> Result<ConsumeOutcome> {
        let config = bucket.config();
        let storage_key = bucket.storage_key(key);

        let state = if bucket.is_external() && self.health.is_available() {
            match bucket.inner.store.consume(&storage_key, config).await {
                Ok(state) => state,
                Err(e) if e.is_store_failure() => {
                    self.health.handle(StoreEvent::Error(e.to_string()));
                    bucket.inner.counters.record_fallback();
                    self.local.consume(&storage_key, config).await?
                }
                Err(e) => return Err(e),
            }
        } else if bucket.is_external() {
            bucket.inner.counters.record_fallback();
            self.local.consume(&storage_key, config).await?
        } else {
            bucket.inner.store.consume(&storage_key, config).await?
        };

        let allowed = !state.exceeds(config);
        bucket.inner.counters.record(allowed);

        tracing::trace!(
            bucket = %config.key_prefix,
            %key,
            consumed = state.consumed,
            limit = config.points,
            allowed,
            "Rate limit check"
        );

        if allowed {
            Ok(ConsumeOutcome {
                remaining: state.remaining(config),
                ms_before_next: state.ms_before_next,
            })
        } else {
            Err(Error::RateLimitExceeded {
                ms_before_next: state.ms_before_next,
            })
        }
    }

    /// Derive the key for `ctx` and consume it.
    ///
    /// Only errors that are not the caller's fault are returned; a spent budget
    /// is a `Decision` with `allowed == false`.
    pub async fn admit(
        &self,
        bucket: &Bucket,
        ctx: &RequestContext,
        strategy: KeyStrategy,
    ) -> Result<Decision> {
        let key = strategy.key_for(ctx);
        match self.consume(bucket, &key).await {
            Ok(outcome) => Ok(Decision {
                allowed: true,
                key,
                remaining: outcome.remaining,
                retry_after_secs: None,
            }),
            Err(e @ Error::RateLimitExceeded { .. }) => {
                tracing::debug!(
                    bucket = bucket.name(),
                    %key,
                    method = %ctx.method,
                    path = %ctx.path,
                    "Rate limit exceeded"
                );
                Ok(Decision {
                    allowed: false,
                    key,
                    remaining: 0,
                    retry_after_secs: e.retry_after_secs(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Forget `key` in `bucket`, local fallback state included.
    pub async fn reset_key(&self, bucket: &Bucket, key: &str) -> Result<bool> {
        let storage_key = bucket.storage_key(key);
        let mut existed = false;

        if bucket.is_external() {
            match bucket.inner.store.delete(&storage_key).await {
                Ok(deleted) => existed |= deleted,
                Err(e) if e.is_store_failure() => {
                    self.health.handle(StoreEvent::Error(e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
        existed |= self.local.delete(&storage_key).await?;

        Ok(existed)
    }

    /// Shut down the external store connection, if any.
    pub async fn close(&self) -> Result<()> {
        if let Some(store) = &self.external {
            store.close().await?;
        }
        Ok(())
    }
}

/// The process-wide static buckets
#[derive(Debug, Clone)]
pub struct Buckets {
    pub auth: Bucket,
    pub general: Bucket,
    pub password_reset: Bucket,
    pub email_verify: Bucket,
}

impl Buckets {
    pub fn create(limiter: &RateLimiter) -> Result<Self> {
        Ok(Self {
            auth: limiter.create_bucket(BucketConfig::auth())?,
            general: limiter.create_bucket(BucketConfig::general())?,
            password_reset: limiter.create_bucket(BucketConfig::password_reset())?,
            email_verify: limiter.create_bucket(BucketConfig::email_verify())?,
        })
    }

    pub fn all(&self) -> [&Bucket; 4] {
        [&self.auth, &self.general, &self.password_reset, &self.email_verify]
    }

    /// Look up a bucket by its key prefix.
    pub fn get(&self, name: &str) -> Result<&Bucket> {
        self.all()
            .into_iter()
            .find(|bucket| bucket.name() == name)
            .ok_or_else(|| Error::UnknownBucket(name.to_string()))
    }

    pub fn stats(&self) -> BTreeMap<String, BucketReport> {
        self.all()
            .into_iter()
            .map(|bucket| {
                (
                    bucket.name().to_string(),
                    BucketReport {
                        backend: bucket.backend_name(),
                        config: bucket.config().clone(),
                        stats: bucket.stats(),
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketReport {
    pub backend: &'static str,
    pub config: BucketConfig,
    pub stats: AdmissionStats,
}
