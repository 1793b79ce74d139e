//! Scheduled GPU usage reports for Clawbernetes.
#![forbid(unsafe_code)]
//!
//! `claw-reports` turns usage statistics from [`claw_usage`] into daily,
//! weekly, monthly and yearly reports and delivers each one exactly once,
//! catching up on boundaries missed while the daemon was down.
//!
//! # Features
//!
//! - **Boundaries**: calendar-aligned report windows in a fixed UTC offset
//! - **Catch-up**: every boundary after the last delivered one is pushed in order
//! - **Delivery hours**: each kind is pushed at its own local hour after the boundary
//! - **Channels**: log, HTTP webhook and audience-routed delivery
//! - **Persistence**: run markers kept in an atomically replaced JSON file
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use claw_reports::{LogChannel, MemoryMarkerStore, ReportKind, ReportScheduler, SchedulerSettings};
//! use claw_usage::{InMemoryTaskSource, SystemClock, UsageService, UsageSettings};
//!
//! let usage = Arc::new(UsageService::new(
//!     Arc::new(InMemoryTaskSource::new()),
//!     Arc::new(SystemClock),
//!     UsageSettings::default(),
//! ));
//! let scheduler = ReportScheduler::new(
//!     usage,
//!     Arc::new(LogChannel::default()),
//!     Arc::new(MemoryMarkerStore::new()),
//!     SchedulerSettings::default(),
//! );
//!
//! let outcome = scheduler.push_now(ReportKind::Daily).unwrap();
//! assert_eq!(outcome.delivered(), 1);
//! ```

#![doc(html_root_url = "https://docs.rs/claw-reports/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod channels;
pub mod config;
pub mod error;
pub mod format;
pub mod kind;
pub mod markers;
pub mod report;
pub mod scheduler;

// Re-export main types at crate root
pub use channels::{
    DeliveryResult, LogChannel, ReportChannel, RoutedChannel, WebhookChannel, WebhookConfig, WebhookPayload,
};
pub use config::{ChannelsConfig, DeliveryHours, ReportingConfig};
pub use error::{ReportError, Result};
pub use format::{format_duration, render};
pub use kind::{ReportKind, ReportRoute, TopN};
pub use markers::{JsonMarkerStore, MemoryMarkerStore, ReportRun, RunMarkerStore};
pub use report::{RankedEntry, Report, ReportSummary};
pub use scheduler::{CatchUpReport, PushOutcome, ReportScheduler, RunState, SchedulerSettings};
