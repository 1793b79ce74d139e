//! Reporting configuration.
//!
//! Configuration for the usage reporting daemon, including:
//! - Logical day and UTC offset
//! - Cache and multi-GPU filtering switches
//! - Enabled report kinds and timer intervals
//! - Source timeout, delivery hours and the missing-report check
//! - Retry policy and delivery channels

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use claw_usage::{offset_from_hours, LogicalDay, RetryPolicy, UsageSettings};

use crate::channels::{LogChannel, ReportChannel, RoutedChannel, WebhookChannel, WebhookConfig};
use crate::error::{ReportError, Result};
use crate::kind::ReportKind;

/// Delivery channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Webhook for daily and weekly reports. Logged when absent.
    pub short_term_webhook: Option<String>,
    /// Webhook for monthly and yearly reports. Logged when absent.
    pub long_term_webhook: Option<String>,
    /// Timeout in seconds for webhook requests.
    pub timeout_secs: u64,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            short_term_webhook: None,
            long_term_webhook: None,
            timeout_secs: 30,
        }
    }
}

impl ChannelsConfig {
    /// Builds the routed channel described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidConfig` if a webhook URL is empty.
    pub fn build(&self) -> Result<RoutedChannel> {
        let short_term = self.channel("short-term", self.short_term_webhook.as_deref())?;
        let long_term = self.channel("long-term", self.long_term_webhook.as_deref())?;
        Ok(RoutedChannel::new(short_term, long_term))
    }

    fn channel(&self, name: &str, url: Option<&str>) -> Result<Arc<dyn ReportChannel>> {
        Ok(match url {
            Some(url) => Arc::new(WebhookChannel::new(
                WebhookConfig::new(name, url)?.with_timeout_secs(self.timeout_secs),
            )),
            None => Arc::new(LogChannel::new(name)),
        })
    }
}

/// Local hour, after each boundary, at which reports are delivered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeliveryHours {
    /// Daily reports.
    pub daily: u32,
    /// Weekly reports.
    pub weekly: u32,
    /// Monthly reports.
    pub monthly: u32,
    /// Yearly reports.
    pub yearly: u32,
}

impl Default for DeliveryHours {
    fn default() -> Self {
        Self {
            daily: ReportKind::Daily.default_delivery_hour(),
            weekly: ReportKind::Weekly.default_delivery_hour(),
            monthly: ReportKind::Monthly.default_delivery_hour(),
            yearly: ReportKind::Yearly.default_delivery_hour(),
        }
    }
}

impl DeliveryHours {
    /// Returns the delivery hour of `kind`.
    #[must_use]
    pub const fn hour(&self, kind: ReportKind) -> u32 {
        match kind {
            ReportKind::Daily => self.daily,
            ReportKind::Weekly => self.weekly,
            ReportKind::Monthly => self.monthly,
            ReportKind::Yearly => self.yearly,
        }
    }
}

/// Main reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportingConfig {
    /// Hour at which the logical day starts.
    pub reset_hour: u32,
    /// Fixed UTC offset, in hours, used for days and report boundaries.
    pub utc_offset_hours: i32,
    /// Whether statistics are cached.
    pub cache_enabled: bool,
    /// Whether non-zero ranks of multi-GPU jobs are dropped.
    pub filter_multi_gpu_tasks: bool,
    /// Report kinds pushed by the timer and catch-up.
    pub enabled_kinds: Vec<ReportKind>,
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Seconds between cache refreshes.
    pub cache_refresh_secs: u64,
    /// Seconds a single record source query may take.
    pub source_timeout_secs: u64,
    /// Local hour of the daily missing-report check.
    pub missing_check_hour: u32,
    /// JSON-lines file holding task records.
    pub records_path: PathBuf,
    /// Directory holding report markers.
    pub state_path: PathBuf,
    /// Retry policy for source queries and deliveries.
    pub retry: RetryPolicy,
    /// Delivery hour per report kind.
    pub delivery_hours: DeliveryHours,
    /// Delivery channels.
    pub channels: ChannelsConfig,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            reset_hour: 4,
            utc_offset_hours: 8,
            cache_enabled: true,
            filter_multi_gpu_tasks: true,
            enabled_kinds: ReportKind::ALL.to_vec(),
            tick_interval_secs: 60,
            cache_refresh_secs: 3600,
            source_timeout_secs: 30,
            missing_check_hour: 5,
            records_path: PathBuf::from("/var/lib/claw-usaged/tasks.jsonl"),
            state_path: PathBuf::from("/var/lib/claw-usaged"),
            retry: RetryPolicy::default(),
            delivery_hours: DeliveryHours::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl ReportingConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ReportError::InvalidConfig {
            reason: format!("failed to read config file '{}': {e}", path.as_ref().display()),
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ReportError::InvalidConfig {
            reason: format!("invalid TOML: {e}"),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Serialization` if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ReportError::Serialization(e.to_string()))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.reset_hour >= 24 {
            return Err(invalid("reset_hour must be less than 24"));
        }

        offset_from_hours(self.utc_offset_hours)
            .map_err(|_| invalid("utc_offset_hours must be within -14..=14"))?;

        if self.tick_interval_secs == 0 {
            return Err(invalid("tick_interval_secs must be greater than 0"));
        }

        if self.cache_refresh_secs == 0 {
            return Err(invalid("cache_refresh_secs must be greater than 0"));
        }

        if self.source_timeout_secs == 0 {
            return Err(invalid("source_timeout_secs must be greater than 0"));
        }

        if self.missing_check_hour >= 24 {
            return Err(invalid("missing_check_hour must be less than 24"));
        }

        if ReportKind::ALL.iter().any(|kind| self.delivery_hours.hour(*kind) >= 24) {
            return Err(invalid("delivery_hours must be less than 24"));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be greater than 0"));
        }

        if self.channels.timeout_secs == 0 {
            return Err(invalid("channels.timeout_secs must be greater than 0"));
        }

        for url in [&self.channels.short_term_webhook, &self.channels.long_term_webhook]
            .into_iter()
            .flatten()
        {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(invalid("webhook URLs must start with http:// or https://"));
            }
        }

        Ok(())
    }

    /// Returns the configured UTC offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset is out of range.
    pub fn offset(&self) -> Result<FixedOffset> {
        Ok(offset_from_hours(self.utc_offset_hours)?)
    }

    /// Returns the configured logical day.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset hour or offset is out of range.
    pub fn logical_day(&self) -> Result<LogicalDay> {
        Ok(LogicalDay::new(self.reset_hour, self.offset()?)?)
    }

    /// Returns settings for the statistics service.
    ///
    /// # Errors
    ///
    /// Returns an error if the logical day is invalid.
    pub fn usage_settings(&self) -> Result<UsageSettings> {
        Ok(UsageSettings {
            logical_day: self.logical_day()?,
            filter_multi_gpu: self.filter_multi_gpu_tasks,
            cache_enabled: self.cache_enabled,
            retry: self.retry.clone(),
            source_timeout: Some(Duration::from_secs(self.source_timeout_secs)),
        })
    }

    /// Returns true if `kind` is pushed by the timer.
    #[must_use]
    pub fn is_enabled(&self, kind: ReportKind) -> bool {
        self.enabled_kinds.contains(&kind)
    }
}

fn invalid(reason: &str) -> ReportError {
    ReportError::InvalidConfig {
        reason: reason.to_string(),
    }
}
