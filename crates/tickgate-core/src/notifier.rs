//! Run alerts.
//!
//! [`Notifier::notify`] renders a [`PipelineRunResult`] into an [`Alert`] and
//! hands it to every configured [`AlertSink`] on a background task. Delivery
//! retries on its own policy; a failed delivery is logged and dropped, never
//! reported back to the run.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::orchestrator::{PairOutcome, PipelineRunResult, RunStatus};
use crate::retry::{retry, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub const fn for_status(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => Self::Info,
            RunStatus::Partial => Self::Warning,
            RunStatus::Failure => Self::Critical,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Rendered summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub title: String,
    pub run_id: Uuid,
    pub status: RunStatus,
    /// One line per pair.
    pub lines: Vec<String>,
}

impl Alert {
    pub fn from_run(result: &PipelineRunResult) -> Self {
        let title = format!(
            "tickgate {} run {} ({}): {} fetched, {} stored, {} errors",
            result.mode,
            result.status,
            result.range,
            result.total_fetched(),
            result.total_stored(),
            result.error_count(),
        );
        Self {
            severity: Severity::for_status(result.status),
            title,
            run_id: result.run_id,
            status: result.status,
            lines: result.outcomes.iter().map(pair_line).collect(),
        }
    }

    /// Plain-text body, title first.
    pub fn render_text(&self) -> String {
        let mut text = format!("[{}] {}", self.severity.as_str(), self.title);
        for line in &self.lines {
            text.push_str("\n- ");
            text.push_str(line);
        }
        text
    }
}

fn pair_line(outcome: &PairOutcome) -> String {
    let mut line = format!(
        "{}/{}: fetched {}, stored {}",
        outcome.instrument, outcome.provider, outcome.fetched, outcome.stored
    );
    if let Some(report) = &outcome.report {
        line.push_str(&format!(", score {:.1} ({})", report.score, report.band));
    }
    if let Some(decision) = outcome.decision {
        line.push_str(&format!(", {decision}"));
    }
    if let Some(error) = &outcome.error {
        line.push_str(&format!(", error: {error}"));
    }
    line
}

/// Failed alert delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{sink} delivery failed: {message}")]
pub struct DeliveryError {
    pub sink: String,
    pub message: String,
    pub retryable: bool,
}

impl DeliveryError {
    pub fn new(sink: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            sink: sink.into(),
            message: message.into(),
            retryable,
        }
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }
}

pub type DeliveryFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>>;

/// Destination for alerts.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    fn deliver<'a>(&'a self, alert: &'a Alert) -> DeliveryFuture<'a>;
}

/// Posts the alert as JSON to a webhook.
pub struct WebhookSink {
    url: String,
    bearer_token: Option<String>,
    http_client: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
            http_client,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }

    async fn post(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let body = serde_json::to_string(alert)
            .map_err(|e| DeliveryError::new(self.name(), e.to_string(), false))?;
        let request = HttpRequest::post_json(self.url.clone(), body)
            .bearer(self.bearer_token.as_deref())
            .timeout(self.timeout);

        self.http_client
            .send(request)
            .await
            .and_then(HttpResponse::error_for_status)
            .map(|_| ())
            .map_err(|e| DeliveryError::new(self.name(), format!("webhook: {e}"), e.is_transient()))
    }
}

impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver<'a>(&'a self, alert: &'a Alert) -> DeliveryFuture<'a> {
        Box::pin(self.post(alert))
    }
}

/// Writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver<'a>(&'a self, alert: &'a Alert) -> DeliveryFuture<'a> {
        Box::pin(async move {
            let lines = alert.lines.join("; ");
            match alert.severity {
                Severity::Info => tracing::info!(run_id = %alert.run_id, %lines, "{}", alert.title),
                Severity::Warning => tracing::warn!(run_id = %alert.run_id, %lines, "{}", alert.title),
                Severity::Critical => tracing::error!(run_id = %alert.run_id, %lines, "{}", alert.title),
            }
            Ok(())
        })
    }
}

/// Fans alerts out to sinks.
#[derive(Clone)]
pub struct Notifier {
    sinks: Vec<Arc<dyn AlertSink>>,
    retry: RetryPolicy,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Notifier {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            sinks: Vec::new(),
            retry,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver the run's alert in the background.
    ///
    /// The handle only exists so callers that need to (tests, a CLI about to
    /// exit) can wait for delivery; dropping it is fine.
    pub fn notify(&self, result: &PipelineRunResult) -> JoinHandle<()> {
        let alert = Alert::from_run(result);
        let notifier = self.clone();
        tokio::spawn(async move {
            for outcome in notifier.deliver(&alert).await {
                if let Err(error) = outcome {
                    tracing::warn!(run_id = %alert.run_id, %error, "alert dropped");
                }
            }
        })
    }

    /// Deliver to every sink, retrying each on its own. One result per sink.
    pub async fn deliver(&self, alert: &Alert) -> Vec<Result<(), DeliveryError>> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            let result = retry(&self.retry, DeliveryError::retryable, |_| sink.deliver(alert)).await;
            if result.is_ok() {
                tracing::debug!(sink = sink.name(), run_id = %alert.run_id, "alert delivered");
            }
            results.push(result);
        }
        results
    }
}
