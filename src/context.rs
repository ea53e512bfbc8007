//! Composition root: every shared component is built here and handed out by reference.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::alert::{AlertSink, TracingAlertSink};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::health::{spawn_probe, HealthChecker, StoreEvent, StoreHealth};
use crate::memory_store::MemoryStore;
use crate::monitor::query::QueryMonitor;
use crate::monitor::request::RequestMonitor;
use crate::rate_limiter::{Buckets, RateLimiter};
use crate::redis_store::RedisStore;
use crate::store::AtomicCounterStore;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub health: Arc<StoreHealth>,
    pub limiter: Arc<RateLimiter>,
    pub buckets: Arc<Buckets>,
    pub requests: Arc<RequestMonitor>,
    pub queries: Arc<QueryMonitor>,
    external: Option<Arc<dyn AtomicCounterStore>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AppContext {
    /// Connect to Redis when configured, start background tasks and create the buckets.
    ///
    /// An unreachable Redis is not an error: the buckets bind to local counters
    /// and the probe keeps trying.
    pub async fn initialize(config: Config) -> Result<Self> {
        let health = Arc::new(StoreHealth::new());

        let external: Option<Arc<dyn AtomicCounterStore>> = if config.redis_enabled() {
            let store = RedisStore::new(&config.redis_url, config.redis_options())?;
            match store.connect().await {
                Ok(()) => health.handle(StoreEvent::Connected),
                Err(e) => {
                    tracing::warn!(error = %e, "Redis unreachable at startup, using local counters");
                    health.handle(StoreEvent::Error(e.to_string()));
                }
            }
            Some(Arc::new(store))
        } else {
            tracing::info!("REDIS_URL not set, using local counters");
            None
        };

        let context = Self::assemble(
            config,
            external,
            health,
            Arc::new(SystemClock),
            Arc::new(TracingAlertSink),
        )?;
        context.spawn_background_tasks();
        Ok(context)
    }

    /// Build a context from explicit parts. Does not spawn background tasks.
    pub fn assemble(
        config: Config,
        external: Option<Arc<dyn AtomicCounterStore>>,
        health: Arc<StoreHealth>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        let local = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = Arc::new(RateLimiter::new(external.clone(), local, health.clone()));
        let buckets = Arc::new(Buckets::create(&limiter)?);

        Ok(Self {
            config: Arc::new(config),
            health,
            limiter,
            buckets,
            requests: Arc::new(RequestMonitor::new(sink.clone(), clock.clone())),
            queries: Arc::new(QueryMonitor::new(sink, clock)),
            external,
            tasks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn health_checker(&self) -> HealthChecker {
        HealthChecker::new(self.external.clone(), self.health.clone())
    }

    pub fn store_backend(&self) -> &'static str {
        match &self.external {
            Some(store) if self.health.is_available() => store.backend_name(),
            _ => "memory",
        }
    }

    fn spawn_background_tasks(&self) {
        let mut handles = Vec::new();

        if let Some(store) = &self.external {
            handles.push(spawn_probe(
                store.clone(),
                self.health.clone(),
                self.config.health_probe_interval(),
            ));
        }

        let local = self.limiter.local_store().clone();
        let interval = self.config.cleanup_interval();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match local.prune_expired() {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Pruned expired local counters"),
                    Err(e) => tracing::warn!(error = %e, "Local counter sweep failed"),
                }
            }
        }));

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend(handles);
        }
    }

    /// Stop background tasks and close the Redis connection.
    pub async fn shutdown(&self) {
        let handles = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        for handle in handles {
            handle.abort();
        }

        if let Err(e) = self.limiter.close().await {
            tracing::warn!(error = %e, "Failed to close counter store cleanly");
        }
        tracing::info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::RecordingAlertSink;

    #[tokio::test]
    async fn test_initialize_without_redis() {
        let context = AppContext::initialize(Config::default()).await.unwrap();
        assert_eq!(context.store_backend(), "memory");
        for bucket in context.buckets.all() {
            assert_eq!(bucket.backend_name(), "memory");
        }
        context.shutdown().await;
    }

    #[tokio::test]
    async fn test_assemble_binds_buckets_to_available_store() {
        let health = Arc::new(StoreHealth::new());
        health.handle(StoreEvent::Connected);
        let external: Arc<dyn AtomicCounterStore> = Arc::new(MemoryStore::new());

        let context = AppContext::assemble(
            Config::default(),
            Some(external),
            health,
            Arc::new(SystemClock),
            Arc::new(RecordingAlertSink::new()),
        )
        .unwrap();

        assert!(context.buckets.auth.is_external());
        assert!(context.buckets.general.is_external());
    }
}
