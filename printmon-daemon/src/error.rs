use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Peripheral unavailable: {0}")]
    PeripheralUnavailable(String),

    #[error("Host job data incomplete, missing: {}", .0.join(", "))]
    HostQueryIncomplete(Vec<&'static str>),

    #[error("Metrics error: {0}")]
    Metrics(#[from] printmon_metrics::MetricsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
