//! Delivery channels for rendered reports.
//!
//! This module provides the [`ReportChannel`] trait and implementations
//! for delivering reports to their audience.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ReportError, Result};
use crate::format::render;
use crate::kind::{ReportKind, ReportRoute};
use crate::report::{Report, ReportSummary};

/// Result of delivering a report.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// Whether the report was delivered.
    pub success: bool,
    /// The channel that processed this report.
    pub channel: String,
    /// Optional message or error description.
    pub message: Option<String>,
    /// Response status code (if applicable).
    pub status_code: Option<u16>,
}

impl DeliveryResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(channel: impl Into<String>) -> Self {
        Self {
            success: true,
            channel: channel.into(),
            message: None,
            status_code: None,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            channel: channel.into(),
            message: Some(message.into()),
            status_code: None,
        }
    }

    /// Sets the status code.
    #[must_use]
    pub const fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Converts an unsuccessful result into `ReportError::DeliveryFailed`.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ReportError::DeliveryFailed {
                channel: self.channel,
                reason: self.message.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

/// Trait for report channels.
///
/// Implement this trait to deliver reports through other protocols or
/// services.
pub trait ReportChannel: Send + Sync + fmt::Debug {
    /// Returns the name of this channel.
    fn name(&self) -> &str;

    /// Delivers a report through this channel.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::DeliveryFailed` if the report cannot be delivered.
    fn deliver(&self, report: &Report) -> Result<DeliveryResult>;

    /// Returns true if this channel is enabled.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Configuration for a webhook channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// The name of this webhook.
    pub name: String,
    /// The URL to post reports to.
    pub url: String,
    /// HTTP headers to include with requests.
    pub headers: HashMap<String, String>,
    /// Timeout in seconds for HTTP requests.
    pub timeout_secs: u64,
    /// Whether this channel is enabled.
    pub enabled: bool,
}

impl WebhookConfig {
    /// Creates a new webhook configuration.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidConfig` if the URL is empty.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(ReportError::InvalidConfig {
                reason: "webhook URL cannot be empty".to_string(),
            });
        }

        Ok(Self {
            name: name.into(),
            url,
            headers: HashMap::new(),
            timeout_secs: 30,
            enabled: true,
        })
    }

    /// Adds a header to the configuration.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A webhook report channel.
///
/// Posts each report as a JSON document holding the rendered text and a
/// structured summary. Connection errors, timeouts and non-2xx responses
/// are reported as failed deliveries.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    config: WebhookConfig,
}

impl WebhookChannel {
    /// Creates a new webhook channel with the given configuration.
    #[must_use]
    pub const fn new(config: WebhookConfig) -> Self {
        Self { config }
    }

    /// Returns the webhook URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Builds the blocking HTTP client for one delivery.
    ///
    /// A blocking client must not be created or dropped on an async runtime
    /// thread, where the daemon builds its channels.
    fn client(&self) -> Result<Client> {
        Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| ReportError::InvalidConfig {
                reason: format!("failed to build HTTP client for {}: {e}", self.config.name),
            })
    }

    /// Formats the report as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Serialization` if serialization fails.
    pub fn format_payload(&self, report: &Report) -> Result<String> {
        let payload = WebhookPayload::from_report(report);
        serde_json::to_string(&payload).map_err(ReportError::from)
    }
}

impl ReportChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn deliver(&self, report: &Report) -> Result<DeliveryResult> {
        if !self.is_enabled() {
            debug!(channel = %self.name(), "channel is disabled, skipping");
            return Ok(DeliveryResult::success(self.name())
                .with_message("channel disabled, report skipped"));
        }

        let payload = WebhookPayload::from_report(report);
        let client = self.client()?;

        let mut request = client.post(&self.config.url).json(&payload);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        debug!(
            channel = %self.name(),
            url = %self.config.url,
            kind = %report.kind,
            window = %report.window,
            "sending webhook report"
        );

        let response = match request.send() {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("request timed out after {}s", self.config.timeout_secs)
                } else {
                    format!("request failed: {e}")
                };
                warn!(channel = %self.name(), url = %self.config.url, error = %e, "webhook request failed");
                return Ok(DeliveryResult::failure(self.name(), reason));
            }
        };

        let status = response.status();
        if status.is_success() {
            info!(channel = %self.name(), kind = %report.kind, status = status.as_u16(), "webhook report delivered");
            Ok(DeliveryResult::success(self.name())
                .with_status_code(status.as_u16())
                .with_message("report delivered"))
        } else {
            warn!(channel = %self.name(), kind = %report.kind, status = status.as_u16(), "webhook rejected report");
            Ok(DeliveryResult::failure(self.name(), format!("webhook returned {status}"))
                .with_status_code(status.as_u16()))
        }
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// The payload format for webhook reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// The payload version.
    pub version: String,
    /// Report title.
    pub title: String,
    /// Rendered report text.
    pub text: String,
    /// Structured report data.
    pub summary: ReportSummary,
}

impl WebhookPayload {
    /// Creates a payload from a report.
    #[must_use]
    pub fn from_report(report: &Report) -> Self {
        Self {
            version: "1".to_string(),
            title: report.kind.title().to_string(),
            text: render(report),
            summary: report.summary(),
        }
    }
}

/// A channel that logs reports.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
    enabled: bool,
}

impl LogChannel {
    /// Creates a new log channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    /// Sets whether the channel is enabled.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new("log")
    }
}

impl ReportChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, report: &Report) -> Result<DeliveryResult> {
        if !self.is_enabled() {
            return Ok(DeliveryResult::success(self.name()).with_message("channel disabled"));
        }

        info!(
            channel = %self.name(),
            kind = %report.kind,
            id = %report.id,
            window = %report.window,
            "REPORT\n{}",
            render(report)
        );

        Ok(DeliveryResult::success(self.name()).with_message("logged to tracing"))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Sends each report to the channel for its audience.
///
/// Daily and weekly reports go to the short-term channel; monthly and
/// yearly reports go to the long-term channel.
#[derive(Debug, Clone)]
pub struct RoutedChannel {
    short_term: Arc<dyn ReportChannel>,
    long_term: Arc<dyn ReportChannel>,
}

impl RoutedChannel {
    /// Creates a router over two channels.
    #[must_use]
    pub fn new(short_term: Arc<dyn ReportChannel>, long_term: Arc<dyn ReportChannel>) -> Self {
        Self { short_term, long_term }
    }

    /// Returns the channel that receives `kind`.
    #[must_use]
    pub fn channel_for(&self, kind: ReportKind) -> &Arc<dyn ReportChannel> {
        match kind.route() {
            ReportRoute::ShortTerm => &self.short_term,
            ReportRoute::LongTerm => &self.long_term,
        }
    }
}

impl ReportChannel for RoutedChannel {
    fn name(&self) -> &str {
        "routed"
    }

    fn deliver(&self, report: &Report) -> Result<DeliveryResult> {
        let channel = self.channel_for(report.kind);
        if !channel.is_enabled() {
            debug!(channel = %channel.name(), kind = %report.kind, "channel is disabled, skipping");
            return Ok(DeliveryResult::success(channel.name()).with_message("channel disabled"));
        }
        channel.deliver(report)
    }
}
