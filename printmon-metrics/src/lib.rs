//! Metric storage for printmon
//!
//! A `MetricsStore` owns counters, gauges, labeled gauge families and info
//! records, and renders them in the Prometheus text exposition format. It
//! holds no lifecycle policy: callers decide when job-scoped entries are
//! zeroed or removed.

pub mod catalog;
pub mod error;
pub mod models;
pub mod store;

pub use catalog::register_printer_metrics;
pub use error::{MetricsError, Result};
pub use models::{MetricKind, MetricSpec};
pub use store::{sanitize_label_name, MetricsStore};
