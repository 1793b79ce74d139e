//! GPU task usage aggregation for Clawbernetes clusters.
#![forbid(unsafe_code)]
//!
//! `claw-usage` turns raw GPU task lifecycle records into per-machine,
//! per-GPU-model, per-project and per-person usage statistics over
//! configurable time windows.
//!
//! # Features
//!
//! - **Windows**: named look-back periods and explicit half-open windows
//! - **Overlap selection**: tasks that start, finish, or run across a window
//! - **Aggregation**: cumulative use time, record tasks, daily late-night champion
//! - **Caching**: single-flight memoization with explicit invalidation
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use claw_usage::{
//!     InMemoryTaskSource, SystemClock, TaskFilter, TaskRecord, TimePeriod, UsageService,
//!     UsageSettings,
//! };
//!
//! let start = Utc::now() - Duration::hours(3);
//! let source = InMemoryTaskSource::with_records(vec![
//!     TaskRecord::new("job-1", "alice")
//!         .with_machine("node-1")
//!         .with_gpu_model("A100")
//!         .with_project("llm")
//!         .with_start(start)
//!         .with_finish(start + Duration::hours(1)),
//! ]);
//!
//! let service = UsageService::new(Arc::new(source), Arc::new(SystemClock), UsageSettings::default());
//! let stats = service.statistics(TimePeriod::OneDay, TaskFilter::all()).unwrap();
//! assert_eq!(stats.result.person("alice").unwrap().cumulative_use_secs, 3600);
//! ```

#![doc(html_root_url = "https://docs.rs/claw-usage/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod aggregate;
pub mod cache;
pub mod clock;
pub mod error;
pub mod retry;
pub mod selector;
pub mod service;
pub mod sleep;
pub mod source;
pub mod types;
pub mod window;

// Re-export main types at crate root
pub use aggregate::{aggregate, AggregationContext, AggregationEngine, SlotPolicy};
pub use cache::{CacheKey, CacheStats, CachedAggregation, StatisticsCache};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Result, UsageError};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use selector::{overlaps, select, TaskFilter};
pub use service::{UsageService, UsageSettings};
pub use sleep::{SleepAnalysis, StartPeriod};
pub use source::{InMemoryTaskSource, JsonLinesTaskSource, TaskSource};
pub use types::{AggregationResult, GpuSummary, PersonSummary, ProjectSummary, TaskRecord, TaskStatus, TaskSummary};
pub use window::{offset_from_hours, same_logical_day, LogicalDay, TimePeriod, TimeWindow};
