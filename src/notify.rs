use crate::config::{CrashReportConfig, Environment, HttpConfig, NotificationConfig};
use crate::http::{ClientPurpose, build_client};
use crate::models::RecordId;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(String),
    #[error("notification rejected: HTTP {0}")]
    Status(u16),
}

pub const DELETED_STATE: &str = "## DELETED";

const SUBJECT: &str = "Inventory sync warning: some catalog changes need attention";

const CLOSING: &str = "Please contact the system administrator if you are unable to resolve \
                       these conflicts.\nIf there has been a major change to the inventory \
                       categories, a full resync may be in order.";

/// Something a human has to look at after the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discrepancy {
    pub id: RecordId,
    pub message: String,
    pub previous_state: String,
    pub new_state: String,
}

/// Which remote operation a per-record failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CreateProduct,
    UpdateProduct,
    DeleteProduct,
    UploadImage,
    ResolveTaxon,
    CreateTaxonomy,
    CreateTaxon,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::CreateProduct => "create_product",
            FailureKind::UpdateProduct => "update_product",
            FailureKind::DeleteProduct => "delete_product",
            FailureKind::UploadImage => "upload_image",
            FailureKind::ResolveTaxon => "resolve_taxon",
            FailureKind::CreateTaxonomy => "create_taxonomy",
            FailureKind::CreateTaxon => "create_taxon",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub id: RecordId,
    pub kind: FailureKind,
    pub detail: String,
}

/// Collects discrepancies and failures over a run.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    discrepancies: Vec<Discrepancy>,
    failures: Vec<RecordFailure>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discrepancy(
        &mut self,
        id: RecordId,
        message: impl Into<String>,
        previous_state: impl Into<String>,
        new_state: impl Into<String>,
    ) {
        self.discrepancies.push(Discrepancy {
            id,
            message: message.into(),
            previous_state: previous_state.into(),
            new_state: new_state.into(),
        });
    }

    pub fn failure(&mut self, id: RecordId, kind: FailureKind, detail: impl Into<String>) {
        self.failures.push(RecordFailure {
            id,
            kind,
            detail: detail.into(),
        });
    }

    pub fn discrepancies(&self) -> &[Discrepancy] {
        &self.discrepancies
    }

    pub fn failures(&self) -> &[RecordFailure] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.discrepancies.is_empty() && self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.discrepancies.len() + self.failures.len()
    }

    pub fn compose(&self, environment: Environment) -> Notification {
        let mut body = String::new();
        if !self.discrepancies.is_empty() {
            body.push_str(
                "Some inventory categories changed recently. The sync does not rename or remove \
catalog categories on its own.\nPlease see below for the list of changes:\n\n",
            );
            for item in &self.discrepancies {
                let _ = writeln!(body, "'{}'", item.message);
                let _ = writeln!(body, "            [ID] : {}", item.id);
                let _ = writeln!(body, "[Previous state] : {}", item.previous_state);
                let _ = writeln!(body, "     [New state] : {}\n", item.new_state);
            }
        }
        if !self.failures.is_empty() {
            let _ = writeln!(
                body,
                "{} record(s) could not be synchronised:\n",
                self.failures.len()
            );
            for failure in &self.failures {
                let _ = writeln!(
                    body,
                    "  - [{}] id {}: {}",
                    failure.kind.as_str(),
                    failure.id,
                    failure.detail
                );
            }
            body.push('\n');
        }
        body.push('\n');
        body.push_str(CLOSING);
        Notification {
            subject: format!("[{environment}] {SUBJECT}"),
            body,
        }
    }

    /// Sends the report when there is anything to report. Never fails the
    /// caller: delivery problems are logged and reported as `false`.
    pub async fn dispatch(&self, notifier: &dyn Notifier, environment: Environment) -> bool {
        if self.is_empty() {
            debug!(target = "catalog_sync.notify", "nothing_to_report");
            return false;
        }
        let message = self.compose(environment);
        match notifier.send(&message).await {
            Ok(()) => {
                info!(target = "catalog_sync.notify", entries = self.len(), "error_report_sent");
                true
            }
            Err(err) => {
                warn!(target = "catalog_sync.notify", error = %err, "error_report_failed");
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

/// Outbound channel for run reports.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &Notification) -> Result<(), NotifyError>;
}

/// Posts reports as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    recipient: Option<String>,
    http: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, recipient: Option<String>, http: &HttpConfig) -> Self {
        Self {
            url: url.into(),
            recipient,
            http: build_client(http, ClientPurpose::Report),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &Notification) -> Result<(), NotifyError> {
        #[derive(Serialize)]
        struct Payload<'a> {
            subject: &'a str,
            text: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            to: Option<&'a str>,
        }
        let response = self
            .http
            .post(&self.url)
            .json(&Payload {
                subject: &message.subject,
                text: &message.body,
                to: self.recipient.as_deref(),
            })
            .send()
            .await
            .map_err(|err| NotifyError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Writes reports to the log when no channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &Notification) -> Result<(), NotifyError> {
        info!(
            target = "catalog_sync.notify",
            subject = %message.subject,
            "error_report:\n{}",
            message.body
        );
        Ok(())
    }
}

pub fn notifier_from_config(config: &NotificationConfig, http: &HttpConfig) -> Box<dyn Notifier> {
    match (&config.webhook_url, config.enabled) {
        (Some(url), true) => Box::new(WebhookNotifier::new(
            url.clone(),
            config.recipient.clone(),
            http,
        )),
        _ => Box::new(LogNotifier),
    }
}

/// Forwards uncaught run failures to an external error tracker.
#[derive(Debug, Clone)]
pub struct CrashReporter {
    config: CrashReportConfig,
    environment: Environment,
    http: Client,
}

#[derive(Debug, Serialize)]
struct CrashNotice<'a> {
    api_key: &'a str,
    environment: &'a str,
    error_class: &'a str,
    message: &'a str,
    occurred_at: String,
}

impl CrashReporter {
    pub fn new(config: CrashReportConfig, environment: Environment, http: &HttpConfig) -> Self {
        Self {
            config,
            environment,
            http: build_client(http, ClientPurpose::Report),
        }
    }

    /// Best effort; returns whether the tracker accepted the notice.
    pub async fn report(&self, error_class: &str, message: &str) -> bool {
        let notice = CrashNotice {
            api_key: &self.config.api_key,
            environment: self.environment.as_str(),
            error_class,
            message,
            occurred_at: Utc::now().to_rfc3339(),
        };
        match self.http.post(&self.config.url).json(&notice).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    target = "catalog_sync.crash",
                    status = %response.status(),
                    "crash_notice_rejected"
                );
                false
            }
            Err(err) => {
                warn!(target = "catalog_sync.crash", error = %err, "crash_notice_failed");
                false
            }
        }
    }
}
