//! Concurrent metric store
//!
//! Every entry is backed by a `prometheus` primitive registered in a
//! registry owned by the store, so `export()` is a plain gather + encode.
//! The entry map is only write-locked for registration; updates take the
//! read lock and rely on each entry's own synchronization.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

use crate::error::{MetricsError, Result};
use crate::models::{MetricKind, MetricSpec};

/// Gauge family keyed by one label. `live` mirrors the label values present
/// in `vec`; both are only changed while holding the `live` lock, so a set
/// and a remove of the same label always serialize.
struct LabeledGauge {
    vec: GaugeVec,
    live: Mutex<BTreeSet<String>>,
}

impl LabeledGauge {
    fn set(&self, label: &str, value: f64) {
        let mut live = self.live.lock();
        self.vec.with_label_values(&[label]).set(value);
        live.insert(label.to_string());
    }

    fn remove(&self, label: &str) {
        let mut live = self.live.lock();
        if live.remove(label) {
            if let Err(e) = self.vec.remove_label_values(&[label]) {
                debug!("Label {} already gone from collector: {}", label, e);
            }
        }
    }

    fn clear(&self) {
        let mut live = self.live.lock();
        self.vec.reset();
        live.clear();
    }

    fn get(&self, label: &str) -> Option<f64> {
        let live = self.live.lock();
        live.contains(label)
            .then(|| self.vec.with_label_values(&[label]).get())
    }

    fn labels(&self) -> Vec<String> {
        self.live.lock().iter().cloned().collect()
    }
}

struct InfoState {
    name: String,
    help: String,
    desc: Desc,
    current: RwLock<Option<(GaugeVec, BTreeMap<String, String>)>>,
}

/// Info record exported as a gauge of value 1 labeled with the mapping.
///
/// The registry pins label names per metric name, so a replace with new
/// keys cannot re-register. Instead this collector stays registered and
/// swaps the unregistered `GaugeVec` it delegates to.
#[derive(Clone)]
struct InfoRecord(Arc<InfoState>);

impl InfoRecord {
    fn new(name: &str, help: &str) -> Result<Self> {
        let desc = Desc::new(name.to_string(), help.to_string(), vec![], HashMap::new())?;
        Ok(Self(Arc::new(InfoState {
            name: name.to_string(),
            help: help.to_string(),
            desc,
            current: RwLock::new(None),
        })))
    }

    fn replace(&self, mapping: &BTreeMap<String, String>) -> Result<()> {
        let labels: BTreeMap<String, String> = mapping
            .iter()
            .filter_map(|(key, value)| sanitize_label_name(key).map(|key| (key, value.clone())))
            .collect();

        let label_names: Vec<&str> = labels.keys().map(String::as_str).collect();
        let label_values: Vec<&str> = labels.values().map(String::as_str).collect();

        let vec = GaugeVec::new(Opts::new(self.0.name.clone(), self.0.help.clone()), &label_names)?;
        vec.with_label_values(label_values.as_slice()).set(1.0);

        *self.0.current.write() = Some((vec, labels));
        Ok(())
    }

    fn mapping(&self) -> Option<BTreeMap<String, String>> {
        self.0.current.read().as_ref().map(|(_, labels)| labels.clone())
    }
}

impl Collector for InfoRecord {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.0.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match self.0.current.read().as_ref() {
            Some((vec, _)) => vec.collect(),
            None => Vec::new(),
        }
    }
}

enum MetricEntry {
    Counter(Counter),
    Gauge(Gauge),
    LabeledGauge(LabeledGauge),
    Info(InfoRecord),
}

impl MetricEntry {
    fn kind(&self) -> MetricKind {
        match self {
            MetricEntry::Counter(_) => MetricKind::Counter,
            MetricEntry::Gauge(_) => MetricKind::Gauge,
            MetricEntry::LabeledGauge(_) => MetricKind::LabeledGauge,
            MetricEntry::Info(_) => MetricKind::Info,
        }
    }
}

fn kind_mismatch(name: &str, expected: MetricKind, found: MetricKind) -> MetricsError {
    MetricsError::InvalidMetricKind {
        name: name.to_string(),
        expected,
        found,
    }
}

fn invalid_argument(name: &str, reason: impl Into<String>) -> MetricsError {
    MetricsError::InvalidArgument {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Turn an arbitrary mapping key into a valid label name.
///
/// Invalid characters become `_`, a leading digit gets a `_` prefix and the
/// reserved `__` prefix is collapsed. Keys with nothing usable are dropped.
pub fn sanitize_label_name(key: &str) -> Option<String> {
    let mut name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    while name.starts_with("__") {
        name.remove(0);
    }
    if name.is_empty() || name == "_" {
        return None;
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    Some(name)
}

/// Thread-safe store of named metrics.
pub struct MetricsStore {
    registry: Registry,
    entries: RwLock<HashMap<String, MetricEntry>>,
}

impl std::fmt::Debug for MetricsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsStore")
            .field("metrics", &self.names())
            .finish()
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsStore {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, name: &str, build: impl FnOnce() -> Result<MetricEntry>) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return Err(MetricsError::AlreadyRegistered(name.to_string()));
        }
        let entry = build()?;
        entries.insert(name.to_string(), entry);
        Ok(())
    }

    /// Register a monotonic counter starting at 0.
    pub fn register_counter(&self, name: &str, help: &str) -> Result<()> {
        self.insert(name, || {
            let counter = Counter::new(name, help)?;
            self.registry.register(Box::new(counter.clone()))?;
            Ok(MetricEntry::Counter(counter))
        })
    }

    /// Register a plain gauge starting at 0.
    pub fn register_gauge(&self, name: &str, help: &str) -> Result<()> {
        self.insert(name, || {
            let gauge = Gauge::new(name, help)?;
            self.registry.register(Box::new(gauge.clone()))?;
            Ok(MetricEntry::Gauge(gauge))
        })
    }

    /// Register a gauge family keyed by `label_name`. Starts with no labels.
    pub fn register_labeled_gauge(&self, name: &str, help: &str, label_name: &str) -> Result<()> {
        self.insert(name, || {
            let vec = GaugeVec::new(Opts::new(name, help), &[label_name])?;
            self.registry.register(Box::new(vec.clone()))?;
            Ok(MetricEntry::LabeledGauge(LabeledGauge {
                vec,
                live: Mutex::new(BTreeSet::new()),
            }))
        })
    }

    /// Register an info record. Nothing is exported until the first `replace`.
    pub fn register_info(&self, name: &str, help: &str) -> Result<()> {
        self.insert(name, || {
            let record = InfoRecord::new(name, help)?;
            self.registry.register(Box::new(record.clone()))?;
            Ok(MetricEntry::Info(record))
        })
    }

    /// Register from a static description.
    pub fn register(&self, spec: &MetricSpec) -> Result<()> {
        match (spec.kind, spec.label) {
            (MetricKind::Counter, _) => self.register_counter(spec.name, spec.help),
            (MetricKind::Gauge, _) => self.register_gauge(spec.name, spec.help),
            (MetricKind::LabeledGauge, Some(label)) => {
                self.register_labeled_gauge(spec.name, spec.help, label)
            }
            (MetricKind::LabeledGauge, None) => {
                Err(invalid_argument(spec.name, "labeled gauge needs a label name"))
            }
            (MetricKind::Info, _) => self.register_info(spec.name, spec.help),
        }
    }

    /// Add a non-negative amount to a counter.
    pub fn increment(&self, name: &str, amount: f64) -> Result<()> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(invalid_argument(
                name,
                format!("counter increment must be finite and >= 0, got {}", amount),
            ));
        }

        let entries = self.entries.read();
        match entries.get(name) {
            Some(MetricEntry::Counter(counter)) => {
                counter.inc_by(amount);
                Ok(())
            }
            Some(other) => Err(kind_mismatch(name, MetricKind::Counter, other.kind())),
            None => Err(MetricsError::UnknownMetric(name.to_string())),
        }
    }

    /// Set a gauge (`label` must be `None`) or one label of a labeled gauge
    /// (`label` must be `Some`).
    pub fn set(&self, name: &str, value: f64, label: Option<&str>) -> Result<()> {
        let entries = self.entries.read();
        match (entries.get(name), label) {
            (Some(MetricEntry::Gauge(gauge)), None) => {
                gauge.set(value);
                Ok(())
            }
            (Some(MetricEntry::Gauge(_)), Some(_)) => {
                Err(invalid_argument(name, "gauge takes no label"))
            }
            (Some(MetricEntry::LabeledGauge(family)), Some(label)) => {
                family.set(label, value);
                Ok(())
            }
            (Some(MetricEntry::LabeledGauge(_)), None) => {
                Err(invalid_argument(name, "labeled gauge needs a label value"))
            }
            (Some(other), _) => Err(kind_mismatch(name, MetricKind::Gauge, other.kind())),
            (None, _) => Err(MetricsError::UnknownMetric(name.to_string())),
        }
    }

    /// Move a plain gauge up or down.
    pub fn add(&self, name: &str, delta: f64) -> Result<()> {
        let entries = self.entries.read();
        match entries.get(name) {
            Some(MetricEntry::Gauge(gauge)) => {
                gauge.add(delta);
                Ok(())
            }
            Some(other) => Err(kind_mismatch(name, MetricKind::Gauge, other.kind())),
            None => Err(MetricsError::UnknownMetric(name.to_string())),
        }
    }

    /// Delete one label of a labeled gauge. Absent labels are a no-op.
    pub fn remove(&self, name: &str, label: &str) -> Result<()> {
        let entries = self.entries.read();
        match entries.get(name) {
            Some(MetricEntry::LabeledGauge(family)) => {
                family.remove(label);
                Ok(())
            }
            Some(other) => Err(kind_mismatch(name, MetricKind::LabeledGauge, other.kind())),
            None => Err(MetricsError::UnknownMetric(name.to_string())),
        }
    }

    /// Delete every label of a labeled gauge.
    pub fn clear(&self, name: &str) -> Result<()> {
        let entries = self.entries.read();
        match entries.get(name) {
            Some(MetricEntry::LabeledGauge(family)) => {
                family.clear();
                Ok(())
            }
            Some(other) => Err(kind_mismatch(name, MetricKind::LabeledGauge, other.kind())),
            None => Err(MetricsError::UnknownMetric(name.to_string())),
        }
    }

    /// Swap the whole mapping of an info record.
    pub fn replace(&self, name: &str, mapping: &BTreeMap<String, String>) -> Result<()> {
        let entries = self.entries.read();
        match entries.get(name) {
            Some(MetricEntry::Info(record)) => record.replace(mapping),
            Some(other) => Err(kind_mismatch(name, MetricKind::Info, other.kind())),
            None => Err(MetricsError::UnknownMetric(name.to_string())),
        }
    }

    /// Current value of a counter or gauge, or of one label of a labeled
    /// gauge. Absent labels read as `None` and are not created.
    pub fn value(&self, name: &str, label: Option<&str>) -> Result<Option<f64>> {
        let entries = self.entries.read();
        match (entries.get(name), label) {
            (Some(MetricEntry::Counter(counter)), None) => Ok(Some(counter.get())),
            (Some(MetricEntry::Gauge(gauge)), None) => Ok(Some(gauge.get())),
            (Some(MetricEntry::LabeledGauge(family)), Some(label)) => Ok(family.get(label)),
            (Some(MetricEntry::LabeledGauge(_)), None) => {
                Err(invalid_argument(name, "labeled gauge needs a label value"))
            }
            (Some(MetricEntry::Counter(_) | MetricEntry::Gauge(_)), Some(_)) => {
                Err(invalid_argument(name, "metric takes no label"))
            }
            (Some(other), _) => Err(kind_mismatch(name, MetricKind::Gauge, other.kind())),
            (None, _) => Err(MetricsError::UnknownMetric(name.to_string())),
        }
    }

    /// Live label values of a labeled gauge, sorted.
    pub fn labels(&self, name: &str) -> Result<Vec<String>> {
        let entries = self.entries.read();
        match entries.get(name) {
            Some(MetricEntry::LabeledGauge(family)) => Ok(family.labels()),
            Some(other) => Err(kind_mismatch(name, MetricKind::LabeledGauge, other.kind())),
            None => Err(MetricsError::UnknownMetric(name.to_string())),
        }
    }

    /// Current (sanitized) mapping of an info record.
    pub fn info(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        let entries = self.entries.read();
        match entries.get(name) {
            Some(MetricEntry::Info(record)) => Ok(record.mapping()),
            Some(other) => Err(kind_mismatch(name, MetricKind::Info, other.kind())),
            None => Err(MetricsError::UnknownMetric(name.to_string())),
        }
    }

    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        self.entries.read().get(name).map(MetricEntry::kind)
    }

    /// Registered metric names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every entry in the text exposition format.
    pub fn export(&self) -> Result<Vec<u8>> {
        let families = self.registry.gather();

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(buffer)
    }
}
