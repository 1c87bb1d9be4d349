//! The exporter's metric catalogue
//!
//! Names are stable identifiers scraped by existing dashboards and must not
//! change.

use crate::error::Result;
use crate::models::MetricSpec;
use crate::store::MetricsStore;

// Process-lifetime counters
pub const PRINTER_TRAVEL_X: &str = "printer_travel_x";
pub const PRINTER_TRAVEL_Y: &str = "printer_travel_y";
pub const PRINTER_TRAVEL_Z: &str = "printer_travel_z";
pub const PRINTER_EXTRUSION: &str = "printer_extrusion";
pub const JOBS_TIME_SECONDS: &str = "jobs_time_seconds";
pub const STARTED_PRINTS: &str = "started_prints";
pub const FAILED_PRINTS: &str = "failed_prints";
pub const DONE_PRINTS: &str = "done_prints";
pub const CANCELLED_PRINTS: &str = "cancelled_prints";
pub const SERVER_TIMELAPSES: &str = "server_timelapses";

// Per-job gauges, zeroed at teardown
pub const JOB_TRAVEL_X: &str = "job_travel_x";
pub const JOB_TRAVEL_Y: &str = "job_travel_y";
pub const JOB_TRAVEL_Z: &str = "job_travel_z";
pub const JOB_EXTRUSION: &str = "job_extrusion";

// Per-job gauges keyed by file path, removed at teardown
pub const JOB_PROGRESS: &str = "job_progress";
pub const JOB_TIME_ELAPSED_SECONDS: &str = "job_time_elapsed_seconds";
pub const JOB_TIME_EST_SECONDS: &str = "job_time_est_seconds";
pub const JOB_TIME_LEFT_ESTIMATE_SECONDS: &str = "job_time_left_estimate_seconds";

pub const SERVER_SLICE_PROGRESS: &str = "server_slice_progress";
pub const SERVER_CLIENTS: &str = "server_clients";
pub const SERVER_CORE_TEMPERATURE: &str = "server_core_temperature";
pub const PRINTER_FAN_SPEED: &str = "printer_fan_speed";
pub const PRINTER_TEMPERATURES_ACTUAL: &str = "printer_temperatures_actual";
pub const PRINTER_TEMPERATURES_TARGET: &str = "printer_temperatures_target";

pub const SERVER_INFO: &str = "server_info";
pub const PRINTER_STATE: &str = "printer_state";

pub const PATH_LABEL: &str = "path";
pub const IDENTIFIER_LABEL: &str = "identifier";

/// Gauges mirroring the tracker totals for the running job, in
/// `[x, y, z, extrusion]` order.
pub const JOB_MOTION_GAUGES: [&str; 4] = [JOB_TRAVEL_X, JOB_TRAVEL_Y, JOB_TRAVEL_Z, JOB_EXTRUSION];

/// Counters accumulating tracker growth over the process lifetime, in
/// `[x, y, z, extrusion]` order.
pub const PRINTER_MOTION_COUNTERS: [&str; 4] = [
    PRINTER_TRAVEL_X,
    PRINTER_TRAVEL_Y,
    PRINTER_TRAVEL_Z,
    PRINTER_EXTRUSION,
];

/// Gauges labeled with the active job's path.
pub const JOB_LABELED_GAUGES: [&str; 4] = [
    JOB_PROGRESS,
    JOB_TIME_ELAPSED_SECONDS,
    JOB_TIME_EST_SECONDS,
    JOB_TIME_LEFT_ESTIMATE_SECONDS,
];

pub const CATALOGUE: &[MetricSpec] = &[
    MetricSpec::counter(PRINTER_TRAVEL_X, "X axis travel total"),
    MetricSpec::counter(PRINTER_TRAVEL_Y, "Y axis travel total"),
    MetricSpec::counter(PRINTER_TRAVEL_Z, "Z axis travel total"),
    MetricSpec::counter(PRINTER_EXTRUSION, "Filament extruded total"),
    MetricSpec::counter(JOBS_TIME_SECONDS, "Printing time total"),
    MetricSpec::counter(STARTED_PRINTS, "Started print jobs"),
    MetricSpec::counter(FAILED_PRINTS, "Failed print jobs"),
    MetricSpec::counter(DONE_PRINTS, "Done print jobs"),
    MetricSpec::counter(CANCELLED_PRINTS, "Cancelled print jobs"),
    MetricSpec::counter(SERVER_TIMELAPSES, "Timelapses captured"),
    MetricSpec::gauge(JOB_TRAVEL_X, "X axis travel in this print"),
    MetricSpec::gauge(JOB_TRAVEL_Y, "Y axis travel in this print"),
    MetricSpec::gauge(JOB_TRAVEL_Z, "Z axis travel in this print"),
    MetricSpec::gauge(JOB_EXTRUSION, "Filament extruded this print"),
    MetricSpec::labeled_gauge(JOB_PROGRESS, "Print progress", PATH_LABEL),
    MetricSpec::labeled_gauge(JOB_TIME_ELAPSED_SECONDS, "Print time elapsed", PATH_LABEL),
    MetricSpec::labeled_gauge(JOB_TIME_EST_SECONDS, "Print time estimate", PATH_LABEL),
    MetricSpec::labeled_gauge(
        JOB_TIME_LEFT_ESTIMATE_SECONDS,
        "Print time left estimate",
        PATH_LABEL,
    ),
    MetricSpec::labeled_gauge(SERVER_SLICE_PROGRESS, "Slice progress", PATH_LABEL),
    MetricSpec::gauge(SERVER_CLIENTS, "The number of connected clients"),
    MetricSpec::gauge(SERVER_CORE_TEMPERATURE, "Core temperature of the host"),
    MetricSpec::gauge(PRINTER_FAN_SPEED, "Fan speed"),
    MetricSpec::labeled_gauge(
        PRINTER_TEMPERATURES_ACTUAL,
        "Reported temperatures",
        IDENTIFIER_LABEL,
    ),
    MetricSpec::labeled_gauge(
        PRINTER_TEMPERATURES_TARGET,
        "Targeted temperatures",
        IDENTIFIER_LABEL,
    ),
    MetricSpec::info(SERVER_INFO, "Host information"),
    MetricSpec::info(PRINTER_STATE, "Printer connection info"),
];

/// Register every catalogue entry into `store`.
pub fn register_printer_metrics(store: &MetricsStore) -> Result<()> {
    for spec in CATALOGUE {
        store.register(spec)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricKind;

    #[test]
    fn test_catalogue_registers_cleanly() {
        let store = MetricsStore::new();
        register_printer_metrics(&store).unwrap();
        assert_eq!(store.names().len(), CATALOGUE.len());
    }

    #[test]
    fn test_registering_twice_fails() {
        let store = MetricsStore::new();
        register_printer_metrics(&store).unwrap();
        assert!(register_printer_metrics(&store).is_err());
    }

    #[test]
    fn test_job_groups_have_expected_kinds() {
        let store = MetricsStore::new();
        register_printer_metrics(&store).unwrap();

        for name in JOB_MOTION_GAUGES {
            assert_eq!(store.kind(name), Some(MetricKind::Gauge), "{}", name);
        }
        for name in PRINTER_MOTION_COUNTERS {
            assert_eq!(store.kind(name), Some(MetricKind::Counter), "{}", name);
        }
        for name in JOB_LABELED_GAUGES {
            assert_eq!(store.kind(name), Some(MetricKind::LabeledGauge), "{}", name);
        }
    }
}
