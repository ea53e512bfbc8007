use regex::Regex;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, LazyLock};

use super::{Category, MetricsSnapshot, PerformanceMonitor, Sample, SampleMeta, Thresholds};
use crate::alert::AlertSink;
use crate::clock::Clock;

const MAX_SQL_LEN: usize = 500;

static POSITIONAL_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\d+").expect("placeholder pattern is valid"));

/// Who issued a query
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub user_id: Option<String>,
    pub route: Option<String>,
    pub method: Option<String>,
}

/// Replace `$N` placeholders with `?` and cap the length.
pub fn sanitize_sql(sql: &str) -> String {
    let normalized = POSITIONAL_PARAM.replace_all(sql, "?");
    normalized.chars().take(MAX_SQL_LEN).collect()
}

/// Database query monitor: 100ms slow, 300ms medium alert, 500ms very slow.
pub struct QueryMonitor {
    monitor: PerformanceMonitor,
}

impl QueryMonitor {
    pub fn new(sink: Arc<dyn AlertSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            monitor: PerformanceMonitor::new(Category::Query, Thresholds::query(), sink, clock),
        }
    }

    /// Time a query and return whatever it returned.
    pub async fn monitor_query<F, T, E>(&self, sql: &str, ctx: QueryContext, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let meta = SampleMeta {
            label: sanitize_sql(sql),
            method: Some(ctx.method.unwrap_or_else(|| "unknown".to_string())),
            identity: Some(ctx.user_id.unwrap_or_else(|| "system".to_string())),
            route: Some(ctx.route.unwrap_or_else(|| "unknown".to_string())),
            status: None,
        };
        self.monitor.time(meta, work).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.monitor.metrics()
    }

    pub fn slow_queries(&self, limit: usize) -> Vec<Sample> {
        self.monitor.slow_samples(limit)
    }

    pub fn thresholds(&self) -> &Thresholds {
        self.monitor.thresholds()
    }

    pub fn reset(&self) {
        self.monitor.reset();
    }

    pub fn inner(&self) -> &PerformanceMonitor {
        &self.monitor
    }
}
