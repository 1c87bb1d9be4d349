//! Host core temperature sampling
//!
//! The sensor is optional. The first failed read logs a warning and turns
//! the probe off for the rest of the process, so a missing sensor costs one
//! log line rather than one per temperature report.

use sysinfo::Components;
use tracing::{debug, warn};

use crate::error::{DaemonError, Result};

/// Something that can report the host CPU temperature in degrees Celsius.
pub trait CoreTemperatureSource: Send {
    fn read_celsius(&mut self) -> Result<f64>;
}

// Substrings of component labels that identify a CPU package or core sensor
const CPU_SENSOR_HINTS: [&str; 6] = ["cpu", "core", "package", "k10temp", "soc", "tctl"];

/// Reads the hottest CPU-like component reported by `sysinfo`.
pub struct SysinfoCoreTemperature {
    components: Components,
}

impl SysinfoCoreTemperature {
    pub fn new() -> Self {
        Self {
            components: Components::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoCoreTemperature {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreTemperatureSource for SysinfoCoreTemperature {
    fn read_celsius(&mut self) -> Result<f64> {
        if self.components.list().is_empty() {
            return Err(DaemonError::PeripheralUnavailable(
                "no temperature sensors found".to_string(),
            ));
        }
        self.components.refresh();

        let readings: Vec<(String, f32)> = self
            .components
            .list()
            .iter()
            .map(|component| (component.label().to_lowercase(), component.temperature()))
            .filter(|(_, celsius)| celsius.is_finite())
            .collect();

        let cpu = readings
            .iter()
            .filter(|(label, _)| CPU_SENSOR_HINTS.iter().any(|hint| label.contains(hint)))
            .map(|(_, celsius)| *celsius)
            .reduce(f32::max);

        // Boards like the Raspberry Pi expose a single unnamed thermal zone
        let celsius = cpu.or_else(|| readings.first().map(|(_, celsius)| *celsius));

        match celsius {
            Some(celsius) => Ok(f64::from(celsius)),
            None => Err(DaemonError::PeripheralUnavailable(
                "temperature sensors report no readings".to_string(),
            )),
        }
    }
}

/// Optional core temperature source that disables itself on first failure.
pub struct CoreTemperatureProbe {
    source: Option<Box<dyn CoreTemperatureSource>>,
}

impl CoreTemperatureProbe {
    pub fn new(source: Box<dyn CoreTemperatureSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    /// Probe backed by the host's hardware sensors.
    pub fn system() -> Self {
        Self::new(Box::new(SysinfoCoreTemperature::new()))
    }

    pub fn disabled() -> Self {
        Self { source: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.source.is_some()
    }

    /// Current temperature, or `None` once the probe is disabled.
    pub fn sample(&mut self) -> Option<f64> {
        let source = self.source.as_mut()?;
        match source.read_celsius() {
            Ok(celsius) => {
                debug!("Core temperature: {:.1}°C", celsius);
                Some(celsius)
            }
            Err(e) => {
                warn!("Core temperature not reported: {}", e);
                self.source = None;
                None
            }
        }
    }
}

impl std::fmt::Debug for CoreTemperatureProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreTemperatureProbe")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakySource {
        reads: Arc<AtomicUsize>,
        fail_after: usize,
    }

    impl CoreTemperatureSource for FlakySource {
        fn read_celsius(&mut self) -> Result<f64> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_after {
                Err(DaemonError::PeripheralUnavailable("sensor gone".to_string()))
            } else {
                Ok(48.5)
            }
        }
    }

    #[test]
    fn test_probe_disables_after_first_failure() {
        let reads = Arc::new(AtomicUsize::new(0));
        let mut probe = CoreTemperatureProbe::new(Box::new(FlakySource {
            reads: Arc::clone(&reads),
            fail_after: 1,
        }));

        assert_eq!(probe.sample(), Some(48.5));
        assert_eq!(probe.sample(), None);
        assert!(!probe.is_enabled());

        // No further reads once disabled
        assert_eq!(probe.sample(), None);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disabled_probe() {
        let mut probe = CoreTemperatureProbe::disabled();
        assert!(!probe.is_enabled());
        assert_eq!(probe.sample(), None);
    }

    #[test]
    fn test_system_probe_never_panics() {
        // Sensor availability depends on the machine; either outcome is fine
        let mut probe = CoreTemperatureProbe::system();
        if let Some(celsius) = probe.sample() {
            assert!(celsius.is_finite());
        }
    }
}
