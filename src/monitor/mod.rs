//! Performance monitoring
//!
//! A `PerformanceMonitor` times units of work, keeps the most recent samples in
//! a ring buffer and classifies each sample against fixed thresholds. The HTTP
//! and database flavors in `request` and `query` share this core.

pub mod query;
pub mod request;
pub mod ring;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::alert::{Alert, AlertLevel, AlertSeverity, AlertSink};
use crate::clock::Clock;
use ring::RingBuffer;

pub const SAMPLE_CAPACITY: usize = 1000;
pub const SLOW_SAMPLE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Http,
    Query,
}

/// Strict lower bounds for each classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(with = "humantime_serde")]
    pub slow: Duration,
    #[serde(with = "humantime_serde")]
    pub very_slow: Duration,
    /// Slow samples above this still raise a medium alert
    #[serde(with = "humantime_serde")]
    pub alert: Option<Duration>,
}

impl Thresholds {
    pub fn http() -> Self {
        Self {
            slow: Duration::from_millis(1000),
            very_slow: Duration::from_millis(3000),
            alert: None,
        }
    }

    pub fn query() -> Self {
        Self {
            slow: Duration::from_millis(100),
            very_slow: Duration::from_millis(500),
            alert: Some(Duration::from_millis(300)),
        }
    }

    pub fn classify(&self, duration: Duration) -> Classification {
        if duration > self.very_slow {
            Classification::VerySlow
        } else if duration > self.slow {
            Classification::Slow
        } else {
            Classification::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Normal,
    Slow,
    VerySlow,
}

/// Caller-supplied description of a unit of work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SampleMeta {
    /// Route for requests, sanitized SQL for queries
    pub label: String,
    pub method: Option<String>,
    pub identity: Option<String>,
    pub route: Option<String>,
    pub status: Option<u16>,
}

impl SampleMeta {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub duration_ms: u64,
    pub timestamp_ms: u64,
    pub success: bool,
    #[serde(flatten)]
    pub meta: SampleMeta,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub slow_count: u64,
    pub failed_count: u64,
    pub success_rate_percent: u64,
    pub average: u64,
    pub p95: u64,
    pub p99: u64,
}

struct MonitorState {
    samples: RingBuffer<Sample>,
    slow: RingBuffer<Sample>,
    status_errors: BTreeMap<u16, u64>,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            samples: RingBuffer::new(SAMPLE_CAPACITY),
            slow: RingBuffer::new(SLOW_SAMPLE_CAPACITY),
            status_errors: BTreeMap::new(),
        }
    }
}

pub struct PerformanceMonitor {
    category: Category,
    thresholds: Thresholds,
    state: Mutex<MonitorState>,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
}

impl PerformanceMonitor {
    pub fn new(
        category: Category,
        thresholds: Thresholds,
        sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            category,
            thresholds,
            state: Mutex::new(MonitorState::new()),
            sink,
            clock,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        // a panic mid-record leaves the buffers usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `work`, record its duration and outcome, and return its result untouched.
    pub async fn time<F, T, E>(&self, meta: SampleMeta, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        let result = work.await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Failure(e.to_string()),
        };
        self.record(meta, start.elapsed(), outcome);
        result
    }

    /// Record a sample for work the caller timed itself.
    pub fn record(&self, meta: SampleMeta, duration: Duration, outcome: Outcome) -> Classification {
        let (success, error) = match outcome {
            Outcome::Success => (true, None),
            Outcome::Failure(reason) => (false, Some(reason)),
        };
        let sample = Sample {
            duration_ms: duration.as_millis() as u64,
            timestamp_ms: self.clock.now_ms(),
            success,
            meta,
            error,
        };
        let classification = self.thresholds.classify(duration);

        {
            let mut state = self.lock();
            if let Some(status) = sample.meta.status.filter(|status| *status >= 400) {
                *state.status_errors.entry(status).or_default() += 1;
            }
            if classification != Classification::Normal {
                state.slow.push(sample.clone());
            }
            state.samples.push(sample.clone());
        }

        self.report(&sample, classification);
        classification
    }

    fn report(&self, sample: &Sample, classification: Classification) {
        let ms = sample.duration_ms;
        let label = sample.meta.label.as_str();
        let method = sample.meta.method.as_deref().unwrap_or("unknown");
        let identity = sample.meta.identity.as_deref().unwrap_or("anonymous");

        match (self.category, classification) {
            (_, Classification::Normal) => {}
            (Category::Http, Classification::Slow) => {
                tracing::warn!(method, route = label, duration_ms = ms, user = identity, "Slow request detected");
            }
            (Category::Http, Classification::VerySlow) => {
                tracing::warn!(method, route = label, duration_ms = ms, user = identity, "Very slow request detected");
                self.alert(
                    format!("Very slow request: {} {} ({}ms)", method, label, ms),
                    AlertLevel::Warning,
                    AlertSeverity::High,
                    sample,
                );
            }
            (Category::Query, Classification::Slow) => {
                tracing::warn!(sql = label, duration_ms = ms, user = identity, "Slow database query detected");
                let alert_above = self.thresholds.alert.map(|d| d.as_millis() as u64);
                if alert_above.is_some_and(|threshold| ms > threshold) {
                    self.alert(
                        format!("Slow query: {}ms", ms),
                        AlertLevel::Warning,
                        AlertSeverity::Medium,
                        sample,
                    );
                }
            }
            (Category::Query, Classification::VerySlow) => {
                tracing::error!(sql = label, duration_ms = ms, user = identity, "Very slow database query detected");
                self.alert(format!("Very slow query: {}ms", ms), AlertLevel::Error, AlertSeverity::High, sample);
            }
        }
    }

    fn alert(&self, message: String, level: AlertLevel, severity: AlertSeverity, sample: &Sample) {
        let kind = match self.category {
            Category::Http => "performance",
            Category::Query => "database",
        };
        self.sink.report_alert(Alert {
            message,
            level,
            severity,
            kind,
            context: serde_json::to_value(sample).unwrap_or_default(),
        });
    }

    /// Aggregate statistics over the current window, computed fresh.
    pub fn metrics(&self) -> MetricsSnapshot {
        let (mut durations, failed_count, slow_count) = {
            let state = self.lock();
            let durations: Vec<u64> = state.samples.iter().map(|s| s.duration_ms).collect();
            let failed = state.samples.iter().filter(|s| !s.success).count() as u64;
            (durations, failed, state.slow.len() as u64)
        };

        let total = durations.len() as u64;
        if total == 0 {
            return MetricsSnapshot {
                success_rate_percent: 100,
                slow_count,
                ..MetricsSnapshot::default()
            };
        }

        durations.sort_unstable();
        let sum: u64 = durations.iter().sum();
        let percentile = |p: f64| {
            let index = ((durations.len() as f64) * p).floor() as usize;
            durations[index.min(durations.len() - 1)]
        };

        MetricsSnapshot {
            total,
            slow_count,
            failed_count,
            success_rate_percent: (((total - failed_count) as f64 / total as f64) * 100.0).round() as u64,
            average: (sum as f64 / total as f64).round() as u64,
            p95: percentile(0.95),
            p99: percentile(0.99),
        }
    }

    /// Most recent slow samples, newest first.
    pub fn slow_samples(&self, limit: usize) -> Vec<Sample> {
        self.lock().slow.iter().rev().take(limit).cloned().collect()
    }

    /// Error responses by status code.
    pub fn status_breakdown(&self) -> BTreeMap<u16, u64> {
        self.lock().status_errors.clone()
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.samples.clear();
        state.slow.clear();
        state.status_errors.clear();
        tracing::info!(category = ?self.category, "Performance metrics reset");
    }
}
