//! Metrics published by the import engine.
//!
//! Only conversion progress is tracked, keyed by the owning import job:
//! - **ProgressMetricsStorage**: in-process counter store (the production gauge)
//! - **ProgressMetrics**: cloneable read-only handle for exporters
//!
//! Progress counters are monotonic (never decrease); computing the positive
//! delta is the reporter's responsibility.

mod progress_metrics;

pub use progress_metrics::{ProgressGauge, ProgressMetrics, ProgressMetricsStorage};
