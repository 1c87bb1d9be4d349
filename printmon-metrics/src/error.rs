use thiserror::Error;

use crate::models::MetricKind;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metric {name} is a {found}, expected a {expected}")]
    InvalidMetricKind {
        name: String,
        expected: MetricKind,
        found: MetricKind,
    },

    #[error("Invalid argument for {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Metric already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
