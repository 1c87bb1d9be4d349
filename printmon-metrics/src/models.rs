//! Metric kinds and static descriptions

/// The four shapes an entry in the store can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Monotonic for the life of the process.
    Counter,
    /// Last write wins.
    Gauge,
    /// One gauge per label value, each removable.
    LabeledGauge,
    /// String key/value record replaced wholesale.
    Info,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::LabeledGauge => write!(f, "labeled gauge"),
            MetricKind::Info => write!(f, "info"),
        }
    }
}

/// Static description of a metric to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSpec {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    /// Label name, only for `MetricKind::LabeledGauge`.
    pub label: Option<&'static str>,
}

impl MetricSpec {
    pub const fn counter(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Counter,
            label: None,
        }
    }

    pub const fn gauge(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Gauge,
            label: None,
        }
    }

    pub const fn labeled_gauge(
        name: &'static str,
        help: &'static str,
        label: &'static str,
    ) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::LabeledGauge,
            label: Some(label),
        }
    }

    pub const fn info(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Info,
            label: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(MetricKind::Counter.to_string(), "counter");
        assert_eq!(MetricKind::LabeledGauge.to_string(), "labeled gauge");
    }

    #[test]
    fn test_spec_constructors() {
        let spec = MetricSpec::labeled_gauge("job_progress", "Print progress", "path");
        assert_eq!(spec.kind, MetricKind::LabeledGauge);
        assert_eq!(spec.label, Some("path"));

        assert_eq!(MetricSpec::info("server_info", "Host").label, None);
    }
}
