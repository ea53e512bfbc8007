//! Alert sink for performance degradations.

use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub message: String,
    pub level: AlertLevel,
    pub severity: AlertSeverity,
    /// `performance` for HTTP, `database` for queries
    pub kind: &'static str,
    pub context: serde_json::Value,
}

pub trait AlertSink: Send + Sync {
    fn report_alert(&self, alert: Alert);
}

/// Forwards alerts to the `gatewatch::alert` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn report_alert(&self, alert: Alert) {
        let context = alert.context.to_string();
        match alert.level {
            AlertLevel::Warning => tracing::warn!(
                target: "gatewatch::alert",
                kind = alert.kind,
                severity = ?alert.severity,
                context = %context,
                "{}",
                alert.message
            ),
            AlertLevel::Error => tracing::error!(
                target: "gatewatch::alert",
                kind = alert.kind,
                severity = ?alert.severity,
                context = %context,
                "{}",
                alert.message
            ),
        }
    }
}

/// Keeps every alert in memory.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|alerts| alerts.clone()).unwrap_or_default()
    }
}

impl AlertSink for RecordingAlertSink {
    fn report_alert(&self, alert: Alert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert);
        }
    }
}
