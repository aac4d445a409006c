//! Notifications for finished runs.
//!
//! Supports webhook POST and desktop notifications. Delivery failures are
//! logged and never change the outcome of a run.

use anyhow::Result;
use serde_json::json;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::pipeline::RunResult;

/// How a run ended, as far as notifications care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NotificationEvent {
    Complete,
    Failure,
}

impl NotificationEvent {
    fn name(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Failure => "failure",
        }
    }
}

/// Where a notification goes, parsed from a config value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Webhook(String),
    Desktop,
    Disabled,
}

impl Target {
    /// Parses `webhook:<url>`, a bare http(s) URL, `desktop` or `none`.
    fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some(url) = value.strip_prefix("webhook:") {
            return (!url.is_empty()).then(|| Self::Webhook(url.to_string()));
        }
        match value {
            "desktop" => Some(Self::Desktop),
            "none" | "" => Some(Self::Disabled),
            url if url.starts_with("http://") || url.starts_with("https://") => {
                Some(Self::Webhook(url.to_string()))
            }
            _ => None,
        }
    }
}

/// What gets reported about a run.
#[derive(Debug, Clone)]
pub(crate) struct NotificationDetails {
    pub run_id: String,
    pub kind: String,
    pub repo: String,
    pub message: String,
    pub error_kind: Option<String>,
    pub commit: Option<String>,
    pub pull_request: Option<String>,
    pub timestamp: String,
}

impl NotificationDetails {
    pub fn from_result(result: &RunResult, repo: &str) -> Self {
        let message = if result.succeeded {
            format!("smith {} finished on {repo}", result.kind)
        } else {
            format!(
                "smith {} failed on {repo}: {}",
                result.kind,
                result.diagnostics.first().map_or("unknown error", |d| {
                    d.lines().next().unwrap_or_default()
                })
            )
        };
        Self {
            run_id: result.run_id.clone(),
            kind: result.kind.to_string(),
            repo: repo.to_string(),
            message,
            error_kind: result.error_kind.map(String::from),
            commit: result.commit.clone(),
            pull_request: result.pull_request.as_ref().map(|pr| pr.url.clone()),
            timestamp: result.finished_at.to_rfc3339(),
        }
    }

    fn payload(&self, event: NotificationEvent) -> serde_json::Value {
        json!({
            "event": event.name(),
            "run_id": self.run_id,
            "kind": self.kind,
            "repo": self.repo,
            "message": self.message,
            "error_kind": self.error_kind,
            "commit": self.commit,
            "pull_request": self.pull_request,
            "timestamp": self.timestamp,
        })
    }
}

/// Sends notifications based on configuration.
pub(crate) struct Notifier {
    config: NotificationConfig,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    /// Notifies about a finished run. Errors are logged, not returned.
    pub async fn notify_run(&self, result: &RunResult, repo: &str) {
        let event = if result.succeeded {
            NotificationEvent::Complete
        } else {
            NotificationEvent::Failure
        };
        self.notify(event, &NotificationDetails::from_result(result, repo))
            .await;
    }

    pub async fn notify(&self, event: NotificationEvent, details: &NotificationDetails) {
        let configured = match event {
            NotificationEvent::Complete => self.config.on_complete.as_deref(),
            NotificationEvent::Failure => self.config.on_failure.as_deref(),
        };
        let Some(value) = configured else {
            return;
        };

        match Target::parse(value) {
            Some(Target::Webhook(url)) => {
                if let Err(e) = send_webhook(&url, &details.payload(event)).await {
                    warn!("Failed to send {} webhook: {}", event.name(), e);
                }
            }
            Some(Target::Desktop) => {
                if let Err(e) = send_desktop_notification("smith", &details.message) {
                    warn!("Failed to send desktop notification: {}", e);
                }
            }
            Some(Target::Disabled) => {}
            None => warn!(value, "Unrecognized notification target"),
        }
    }
}

/// Delays before the second and third delivery attempts.
const WEBHOOK_BACKOFF: [Duration; 2] = [Duration::from_secs(2), Duration::from_secs(4)];

#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Delivered,
    /// Worth another attempt: server errors and rate limiting.
    Transient,
    Rejected,
}

fn classify(status: reqwest::StatusCode) -> Delivery {
    if status.is_success() {
        Delivery::Delivered
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Delivery::Transient
    } else {
        Delivery::Rejected
    }
}

/// POSTs `payload` to `url`. Transient failures and network errors are
/// retried after each `WEBHOOK_BACKOFF` delay; a rejection fails at once.
async fn send_webhook(url: &str, payload: &serde_json::Value) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let delays = std::iter::once(Duration::ZERO).chain(WEBHOOK_BACKOFF);
    let mut failure = String::new();

    for (attempt, delay) in delays.enumerate() {
        if !delay.is_zero() {
            debug!(event = "webhook_retry", attempt = attempt + 1, ?delay);
            tokio::time::sleep(delay).await;
        }

        let response = match client.post(url).json(payload).send().await {
            Ok(response) => response,
            Err(e) => {
                failure = e.to_string();
                continue;
            }
        };
        let status = response.status();
        match classify(status) {
            Delivery::Delivered => {
                debug!(event = "webhook_sent", url);
                return Ok(());
            }
            Delivery::Transient => {
                failure = format!("{status}: {}", response.text().await.unwrap_or_default());
            }
            Delivery::Rejected => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Webhook {url} rejected the payload with {status}: {body}");
            }
        }
    }

    anyhow::bail!(
        "Webhook {url} failed after {} attempts, last error {failure}",
        WEBHOOK_BACKOFF.len() + 1
    )
}

/// Sends a desktop notification with whichever tool the platform has.
fn send_desktop_notification(title: &str, body: &str) -> Result<()> {
    if Command::new("notify-send")
        .args([title, body])
        .output()
        .is_ok()
    {
        return Ok(());
    }

    if Command::new("osascript")
        .args([
            "-e",
            &format!(
                "display notification \"{}\" with title \"{}\"",
                body.replace('"', "\\\""),
                title.replace('"', "\\\"")
            ),
        ])
        .output()
        .is_ok()
    {
        return Ok(());
    }

    anyhow::bail!("No desktop notification command available (tried notify-send, osascript)");
}
