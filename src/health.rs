use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;

use crate::store::AtomicCounterStore;

/// Connectivity events emitted for the external counter store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Connected,
    Error(String),
}

/// Shared availability flag of the external store.
///
/// Reads may be stale. Every transition is logged once, repeated events in the
/// same state are silent.
#[derive(Debug, Default)]
pub struct StoreHealth {
    available: AtomicBool,
    transitions: AtomicU64,
}

impl StoreHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Number of state changes since startup.
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    pub fn handle(&self, event: StoreEvent) {
        match event {
            StoreEvent::Connected => {
                if !self.available.swap(true, Ordering::AcqRel) {
                    self.transitions.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(target: "gatewatch::store", "Counter store connected, using shared accounting");
                }
            }
            StoreEvent::Error(reason) => {
                if self.available.swap(false, Ordering::AcqRel) {
                    self.transitions.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        target: "gatewatch::store",
                        error = %reason,
                        "Counter store unavailable, falling back to local accounting"
                    );
                }
            }
        }
    }
}

/// Periodically ping the store and feed the result into `health`.
pub fn spawn_probe(
    store: Arc<dyn AtomicCounterStore>,
    health: Arc<StoreHealth>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick fires immediately, startup already probed
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.ping().await {
                Ok(()) => health.handle(StoreEvent::Connected),
                Err(e) => health.handle(StoreEvent::Error(e.to_string())),
            }
        }
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub counter_store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

pub struct HealthChecker {
    store: Option<Arc<dyn AtomicCounterStore>>,
    health: Arc<StoreHealth>,
}

impl HealthChecker {
    pub fn new(store: Option<Arc<dyn AtomicCounterStore>>, health: Arc<StoreHealth>) -> Self {
        Self { store, health }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME).unwrap_or_default().as_secs();

        let store_status = self.check_store().await;

        let overall_status = if store_status.status == "healthy" {
            "healthy"
        } else {
            // still serving from local counters
            "degraded"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            dependencies: DependencyStatus {
                counter_store: store_status,
            },
        }
    }

    async fn check_store(&self) -> ServiceStatus {
        let Some(store) = &self.store else {
            return ServiceStatus {
                backend: "memory".to_string(),
                status: "unavailable".to_string(),
                response_time_ms: 0,
                error: Some("Redis not configured".to_string()),
            };
        };

        let start = Instant::now();
        let result = store.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                self.health.handle(StoreEvent::Connected);
                ServiceStatus {
                    backend: store.backend_name().to_string(),
                    status: "healthy".to_string(),
                    response_time_ms,
                    error: None,
                }
            }
            Err(e) => {
                self.health.handle(StoreEvent::Error(e.to_string()));
                ServiceStatus {
                    backend: store.backend_name().to_string(),
                    status: "unavailable".to_string(),
                    response_time_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
