use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{Category, Classification, MetricsSnapshot, Outcome, PerformanceMonitor, Sample, SampleMeta, Thresholds};
use crate::alert::AlertSink;
use crate::clock::Clock;

/// Completed HTTP exchange as seen by the monitoring middleware
#[derive(Debug, Clone)]
pub struct CompletedRequest {
    pub method: String,
    pub route: String,
    pub status: u16,
    pub duration: Duration,
    pub user_id: Option<String>,
}

/// HTTP request monitor: 1000ms slow, 3000ms very slow.
pub struct RequestMonitor {
    monitor: PerformanceMonitor,
}

impl RequestMonitor {
    pub fn new(sink: Arc<dyn AlertSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            monitor: PerformanceMonitor::new(Category::Http, Thresholds::http(), sink, clock),
        }
    }

    /// Responses with status >= 400 count as failed samples.
    pub fn record_request(&self, request: CompletedRequest) -> Classification {
        let outcome = if request.status < 400 {
            Outcome::Success
        } else {
            Outcome::Failure(format!("HTTP {}", request.status))
        };

        tracing::info!(
            target: "gatewatch::request",
            method = %request.method,
            route = %request.route,
            status = request.status,
            duration_ms = request.duration.as_millis() as u64,
            user = request.user_id.as_deref().unwrap_or("anonymous"),
            "Request completed"
        );

        let meta = SampleMeta {
            label: request.route.clone(),
            method: Some(request.method),
            identity: request.user_id,
            route: Some(request.route),
            status: Some(request.status),
        };
        self.monitor.record(meta, request.duration, outcome)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.monitor.metrics()
    }

    pub fn status_breakdown(&self) -> BTreeMap<u16, u64> {
        self.monitor.status_breakdown()
    }

    pub fn slow_requests(&self, limit: usize) -> Vec<Sample> {
        self.monitor.slow_samples(limit)
    }

    pub fn thresholds(&self) -> &Thresholds {
        self.monitor.thresholds()
    }

    pub fn reset(&self) {
        self.monitor.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::RecordingAlertSink;
    use crate::clock::SystemClock;

    fn completed(status: u16, ms: u64) -> CompletedRequest {
        CompletedRequest {
            method: "GET".to_string(),
            route: "/api/interviews/:id".to_string(),
            status,
            duration: Duration::from_millis(ms),
            user_id: Some("3".to_string()),
        }
    }

    #[test]
    fn test_error_statuses_count_as_failures() {
        let monitor = RequestMonitor::new(Arc::new(RecordingAlertSink::new()), Arc::new(SystemClock));
        monitor.record_request(completed(200, 12));
        monitor.record_request(completed(500, 40));
        monitor.record_request(completed(429, 1));

        let metrics = monitor.metrics();
        assert_eq!(metrics.total, 3);
        assert_eq!(metrics.failed_count, 2);

        let breakdown = monitor.status_breakdown();
        assert_eq!(breakdown.get(&500), Some(&1));
        assert_eq!(breakdown.get(&429), Some(&1));
        assert_eq!(breakdown.get(&200), None);
    }

    #[test]
    fn test_very_slow_request_alert_names_route() {
        let sink = Arc::new(RecordingAlertSink::new());
        let monitor = RequestMonitor::new(sink.clone(), Arc::new(SystemClock));

        let class = monitor.record_request(completed(200, 3200));
        assert_eq!(class, Classification::VerySlow);

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "Very slow request: GET /api/interviews/:id (3200ms)");
        assert_eq!(alerts[0].context["identity"], "3");
        assert_eq!(monitor.slow_requests(5).len(), 1);
    }
}
