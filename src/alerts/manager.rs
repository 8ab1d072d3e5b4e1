use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, warn};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

/// Most-recent alerts retained for inspection
const HISTORY_CAP: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Operational alert raised from pipeline health signals.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

/// `Critical` past twice the threshold, `High` for any other breach.
fn threshold_severity(observed: f64, threshold: f64) -> Severity {
    if observed > threshold * 2.0 {
        Severity::Critical
    } else {
        Severity::High
    }
}

impl Alert {
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            title: title.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
            resolved: false,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn processing_lag(lag_secs: i64, threshold_secs: i64) -> Self {
        Self::new(
            "processing-lag",
            threshold_severity(lag_secs as f64, threshold_secs as f64),
            "Event processing lag",
            format!(
                "Indexer is {}s behind (threshold {}s)",
                lag_secs, threshold_secs
            ),
        )
        .with_details(serde_json::json!({
            "lag_seconds": lag_secs,
            "threshold_seconds": threshold_secs,
        }))
    }

    pub fn error_rate(rate: f64, threshold: f64) -> Self {
        Self::new(
            "error-rate",
            threshold_severity(rate, threshold),
            "Batch write error rate",
            format!(
                "{:.1}% of batch writes failed (threshold {:.1}%)",
                rate * 100.0,
                threshold * 100.0
            ),
        )
        .with_details(serde_json::json!({
            "error_rate": rate,
            "threshold": threshold,
        }))
    }

    pub fn write_latency(latency_ms: u64, threshold_ms: u64) -> Self {
        Self::new(
            "storage-write-latency",
            threshold_severity(latency_ms as f64, threshold_ms as f64),
            "Storage write latency",
            format!(
                "Batch transaction took {}ms (threshold {}ms)",
                latency_ms, threshold_ms
            ),
        )
        .with_details(serde_json::json!({
            "latency_ms": latency_ms,
            "threshold_ms": threshold_ms,
        }))
    }

    pub fn upstream_rpc_error(consecutive: u32, threshold: u32) -> Self {
        Self::new(
            "upstream-rpc-error",
            threshold_severity(consecutive as f64, threshold as f64),
            "Upstream RPC errors",
            format!(
                "{} consecutive upstream failures (threshold {})",
                consecutive, threshold
            ),
        )
        .with_details(serde_json::json!({
            "consecutive_failures": consecutive,
            "threshold": threshold,
        }))
    }
}

/// Outbound notification channel. Delivery failures are the manager's
/// problem to swallow, never the pipeline's.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Fallback channel that writes alerts to the application log.
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        error!(
            "[ALERT:{}] {}: {}",
            alert.severity.as_str(),
            alert.title,
            alert.message
        );
        Ok(())
    }
}

struct AlertState {
    history: VecDeque<Alert>,
    active: FxHashMap<String, Alert>,
}

/// Tracks raised alerts and fans them out by severity.
///
/// Low severity is recorded only; medium goes to the first configured
/// channel; high and critical go to every channel. A channel failure is
/// logged and swallowed so alerting can never destabilize ingestion.
pub struct AlertManager {
    state: Mutex<AlertState>,
    channels: Vec<Box<dyn AlertChannel>>,
}

impl AlertManager {
    pub fn new(channels: Vec<Box<dyn AlertChannel>>) -> Self {
        Self {
            state: Mutex::new(AlertState {
                history: VecDeque::with_capacity(HISTORY_CAP),
                active: FxHashMap::default(),
            }),
            channels,
        }
    }

    pub async fn send_alert(&self, alert: Alert) {
        {
            let mut state = self.state.lock().await;
            if state.history.len() == HISTORY_CAP {
                state.history.pop_front();
            }
            state.history.push_back(alert.clone());
            state.active.insert(alert.id.clone(), alert.clone());
        }

        let recipients: &[Box<dyn AlertChannel>] = match alert.severity {
            Severity::Low => &[],
            Severity::Medium => self.channels.get(..1).unwrap_or(&[]),
            Severity::High | Severity::Critical => &self.channels,
        };

        for channel in recipients {
            if let Err(e) = channel.deliver(&alert).await {
                warn!(
                    "Alert delivery via {} failed (ignored): {:#}",
                    channel.name(),
                    e
                );
            }
        }
    }

    /// Mark an active alert resolved and drop it from the active set.
    pub async fn resolve(&self, alert_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if let Some(mut alert) = state.active.remove(alert_id) {
            alert.resolved = true;
            if let Some(entry) = state
                .history
                .iter_mut()
                .rev()
                .find(|a| a.id == alert_id)
            {
                entry.resolved = true;
            }
            true
        } else {
            false
        }
    }

    pub async fn active_alerts(&self) -> Vec<Alert> {
        self.state.lock().await.active.values().cloned().collect()
    }

    pub async fn history_len(&self) -> usize {
        self.state.lock().await.history.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Records which channel saw which alert; optionally fails delivery.
    struct RecordingChannel {
        label: &'static str,
        delivered: Arc<Mutex<Vec<(String, String)>>>,
        fail: AtomicBool,
    }

    impl RecordingChannel {
        fn new(label: &'static str, delivered: Arc<Mutex<Vec<(String, String)>>>) -> Self {
            Self {
                label,
                delivered,
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        fn name(&self) -> &str {
            self.label
        }

        async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("channel down");
            }
            self.delivered
                .lock()
                .await
                .push((self.label.to_string(), alert.id.clone()));
            Ok(())
        }
    }

    fn two_channel_manager() -> (AlertManager, Arc<Mutex<Vec<(String, String)>>>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let manager = AlertManager::new(vec![
            Box::new(RecordingChannel::new("primary", delivered.clone())),
            Box::new(RecordingChannel::new("secondary", delivered.clone())),
        ]);
        (manager, delivered)
    }

    #[tokio::test]
    async fn test_low_severity_is_recorded_but_not_delivered() {
        let (manager, delivered) = two_channel_manager();

        manager
            .send_alert(Alert::new("a1", Severity::Low, "t", "m"))
            .await;

        assert!(delivered.lock().await.is_empty());
        assert_eq!(manager.history_len().await, 1);
        assert_eq!(manager.active_alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_medium_goes_to_first_channel_only() {
        let (manager, delivered) = two_channel_manager();

        manager
            .send_alert(Alert::new("a1", Severity::Medium, "t", "m"))
            .await;

        let delivered = delivered.lock().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "primary");
    }

    #[tokio::test]
    async fn test_critical_goes_to_all_channels() {
        let (manager, delivered) = two_channel_manager();

        manager
            .send_alert(Alert::new("a1", Severity::Critical, "t", "m"))
            .await;

        assert_eq!(delivered.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_channel_failure_is_swallowed() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let failing = RecordingChannel::new("primary", delivered.clone());
        failing.fail.store(true, Ordering::SeqCst);
        let manager = AlertManager::new(vec![
            Box::new(failing),
            Box::new(RecordingChannel::new("secondary", delivered.clone())),
        ]);

        manager
            .send_alert(Alert::new("a1", Severity::High, "t", "m"))
            .await;

        // Second channel still received the alert
        let delivered = delivered.lock().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "secondary");
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let manager = AlertManager::new(vec![]);

        for i in 0..(HISTORY_CAP + 5) {
            manager
                .send_alert(Alert::new(format!("a{}", i), Severity::Low, "t", "m"))
                .await;
        }

        assert_eq!(manager.history_len().await, HISTORY_CAP);
        let state = manager.state.lock().await;
        // Oldest entries were dropped first
        assert_eq!(state.history.front().unwrap().id, "a5");
    }

    #[tokio::test]
    async fn test_resolve_removes_from_active() {
        let manager = AlertManager::new(vec![]);
        manager
            .send_alert(Alert::new("a1", Severity::Low, "t", "m"))
            .await;

        assert!(manager.resolve("a1").await);
        assert!(manager.active_alerts().await.is_empty());
        assert!(!manager.resolve("a1").await);
    }

    #[test]
    fn test_threshold_severity_doubling_rule() {
        assert_eq!(
            Alert::processing_lag(700, 300).severity,
            Severity::Critical
        );
        assert_eq!(Alert::processing_lag(400, 300).severity, Severity::High);
        assert_eq!(Alert::error_rate(0.15, 0.1).severity, Severity::High);
        assert_eq!(Alert::error_rate(0.25, 0.1).severity, Severity::Critical);
        assert_eq!(
            Alert::write_latency(20_000, 5_000).severity,
            Severity::Critical
        );
    }
}
