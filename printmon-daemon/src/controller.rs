//! Print session controller
//!
//! Drives the job-scoped metrics through `Idle -> Active -> Completing ->
//! Idle`. Host callbacks can arrive concurrently from any thread; all session
//! state lives behind one mutex, and the deferred teardown claims its
//! `TaskHandle` under that same mutex. A `print_started` that cancels the
//! handle first therefore always wins against a stale teardown.
//!
//! Store failures are logged and swallowed: nothing here returns an error to
//! the host callback that triggered it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use printmon_gcode::{EventKind, MotionTotals, MotionTracker};
use printmon_metrics::catalog::*;
use printmon_metrics::MetricsStore;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::DaemonError;
use crate::events::{CommandPhase, HostEvent, LifecycleKind, TemperatureReading};
use crate::host::JobDataSource;
use crate::peripheral::CoreTemperatureProbe;
use crate::scheduler::{Clock, Scheduler, TaskHandle};

/// Printer state reported by the host when the serial link is gone.
pub const OFFLINE_STATE_ID: &str = "OFFLINE";

/// Delays before job-scoped entries are cleared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    /// Window after a job ends during which its final values stay exported.
    pub teardown_delay: Duration,
    /// Same, for a finished slice.
    pub slice_teardown_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            teardown_delay: Duration::from_secs(30),
            slice_teardown_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Active,
    /// Job ended, teardown scheduled but not applied yet.
    Completing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintOutcome {
    Done,
    Failed,
    Cancelled,
}

impl PrintOutcome {
    fn counter(self) -> &'static str {
        match self {
            PrintOutcome::Done => DONE_PRINTS,
            PrintOutcome::Failed => FAILED_PRINTS,
            PrintOutcome::Cancelled => CANCELLED_PRINTS,
        }
    }
}

impl std::fmt::Display for PrintOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrintOutcome::Done => write!(f, "done"),
            PrintOutcome::Failed => write!(f, "failed"),
            PrintOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

struct Session {
    phase: SessionPhase,
    tracker: MotionTracker,
    /// Tracker totals already folded into the lifetime counters.
    reported: MotionTotals,
    active_label: Option<String>,
    started_at: Option<Duration>,
    /// Start of a print torn down by going offline, awaiting its terminal event.
    interrupted_at: Option<Duration>,
    pending_teardown: Option<TaskHandle>,
}

impl Session {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            tracker: MotionTracker::new(),
            reported: MotionTotals::default(),
            active_label: None,
            started_at: None,
            interrupted_at: None,
            pending_teardown: None,
        }
    }
}

struct Inner {
    store: Arc<MetricsStore>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    job_data: Arc<dyn JobDataSource>,
    config: ControllerConfig,
    session: Mutex<Session>,
    clients: Mutex<u64>,
    slice_removals: Mutex<HashMap<String, TaskHandle>>,
    core_probe: Mutex<CoreTemperatureProbe>,
    server_info: Mutex<BTreeMap<String, String>>,
}

fn report(action: &str, result: printmon_metrics::Result<()>) {
    if let Err(e) = result {
        warn!("Failed to {}: {}", action, e);
    }
}

fn totals_as_array(totals: &MotionTotals) -> [f64; 4] {
    [
        totals.travel_x,
        totals.travel_y,
        totals.travel_z,
        totals.extrusion,
    ]
}

/// Info label values are strings; everything else is rendered as JSON.
fn label_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Inner {
    fn zero_job_gauges(&self) {
        for name in JOB_MOTION_GAUGES {
            report("zero job gauge", self.store.set(name, 0.0, None));
        }
    }

    fn remove_job_labels(&self, label: &str) {
        for name in JOB_LABELED_GAUGES {
            report("remove job label", self.store.remove(name, label));
        }
    }

    /// Zero the per-job gauges, drop the job's labels and return to `Idle`.
    fn teardown(&self, session: &mut Session) {
        self.zero_job_gauges();
        if let Some(label) = session.active_label.take() {
            self.remove_job_labels(&label);
        }
        session.phase = SessionPhase::Idle;
        session.started_at = None;
        session.pending_teardown = None;
    }

    fn fire_teardown(&self, handle: &TaskHandle) {
        let mut session = self.session.lock();
        if !handle.claim() {
            debug!("Skipping cancelled teardown");
            return;
        }
        info!("Tearing down finished job");
        self.teardown(&mut session);
    }

    fn fire_slice_removal(&self, path: &str, handle: &TaskHandle) {
        let mut removals = self.slice_removals.lock();
        if !handle.claim() {
            return;
        }
        report(
            "remove slice progress",
            self.store.remove(SERVER_SLICE_PROGRESS, path),
        );
        if removals
            .get(path)
            .is_some_and(|pending| pending.same_task(handle))
        {
            removals.remove(path);
        }
    }

    fn add_print_time(&self, started_at: Duration) {
        let elapsed = self.clock.now().saturating_sub(started_at);
        report(
            "add printing time",
            self.store.increment(JOBS_TIME_SECONDS, elapsed.as_secs_f64()),
        );
    }

    fn fold_motion(&self, session: &mut Session) {
        let totals = session.tracker.totals();
        let growth = totals_as_array(&totals.growth_since(&session.reported));

        for (name, amount) in PRINTER_MOTION_COUNTERS.into_iter().zip(growth) {
            if amount > 0.0 {
                report("increment motion counter", self.store.increment(name, amount));
            }
        }
        session.reported = totals;

        if session.phase == SessionPhase::Active {
            for (name, value) in JOB_MOTION_GAUGES.into_iter().zip(totals_as_array(&totals)) {
                report("set job gauge", self.store.set(name, value, None));
            }
        }
    }
}

/// Owns the print session state machine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PrintSessionController {
    inner: Arc<Inner>,
}

impl PrintSessionController {
    pub fn new(
        store: Arc<MetricsStore>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        job_data: Arc<dyn JobDataSource>,
        core_probe: CoreTemperatureProbe,
        config: ControllerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                scheduler,
                clock,
                job_data,
                config,
                session: Mutex::new(Session::new()),
                clients: Mutex::new(0),
                slice_removals: Mutex::new(HashMap::new()),
                core_probe: Mutex::new(core_probe),
                server_info: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<MetricsStore> {
        &self.inner.store
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.session.lock().phase
    }

    pub fn active_label(&self) -> Option<String> {
        self.inner.session.lock().active_label.clone()
    }

    /// Tracker totals of the current (or last) session.
    pub fn job_totals(&self) -> MotionTotals {
        self.inner.session.lock().tracker.totals()
    }

    /// Route one host event to its handler.
    pub fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::Temperature { readings } => self.on_temperatures(&readings),
            HostEvent::Gcode { line, phase } => self.on_command(&line, phase),
            HostEvent::Lifecycle { event, payload } => self.on_lifecycle(event, &payload),
            HostEvent::JobProgress { path, progress, .. } => self.on_job_progress(&path, progress),
            HostEvent::SliceProgress {
                source_path,
                progress,
            } => self.on_slice_progress(&source_path, progress),
            HostEvent::ServerInfo {
                octoprint_version,
                host,
            } => {
                let mut fields = BTreeMap::new();
                if let Some(version) = octoprint_version {
                    fields.insert("octoprint_version".to_string(), version);
                }
                if let Some(host) = host {
                    fields.insert("host".to_string(), host);
                }
                self.record_server_info(fields);
            }
            HostEvent::CurrentData { .. } => {
                debug!("Current data events are consumed by the job data cache");
            }
        }
    }

    pub fn on_lifecycle(&self, event: LifecycleKind, payload: &Map<String, Value>) {
        match event {
            LifecycleKind::ClientOpened => self.on_client_opened(),
            LifecycleKind::ClientClosed => self.on_client_closed(),
            LifecycleKind::PrinterStateChanged => self.on_printer_state_changed(payload),
            LifecycleKind::PrintStarted => self.on_print_started(),
            LifecycleKind::PrintDone => self.on_print_finished(PrintOutcome::Done),
            LifecycleKind::PrintFailed => self.on_print_finished(PrintOutcome::Failed),
            LifecycleKind::PrintCancelled => self.on_print_finished(PrintOutcome::Cancelled),
            LifecycleKind::CaptureDone => self.on_capture_done(),
            LifecycleKind::Other => {}
        }
    }

    /// Start a new session, preempting any teardown still pending.
    pub fn on_print_started(&self) {
        let inner = &self.inner;
        let mut session = inner.session.lock();

        if let Some(handle) = session.pending_teardown.take() {
            if handle.cancel() {
                // The old job's cleanup happens now instead of later
                info!("New print preempts pending teardown");
                inner.teardown(&mut session);
            }
        }
        if session.phase == SessionPhase::Active {
            warn!("Print started while another print is active, restarting session");
            if let Some(label) = session.active_label.take() {
                inner.remove_job_labels(&label);
            }
        }

        session.tracker.reset();
        session.reported = MotionTotals::default();
        session.active_label = None;
        session.interrupted_at = None;
        session.started_at = Some(inner.clock.now());
        session.phase = SessionPhase::Active;
        inner.zero_job_gauges();

        report("count started print", inner.store.increment(STARTED_PRINTS, 1.0));
        info!("Print started");
    }

    /// Feed one command line. Only lines that reached the printer count.
    pub fn on_command(&self, line: &str, phase: CommandPhase) {
        if phase != CommandPhase::Sent {
            return;
        }

        let label = {
            let mut session = self.inner.session.lock();
            match session.tracker.process_line(line) {
                EventKind::Movement => self.inner.fold_motion(&mut session),
                EventKind::FanSpeed => {
                    if let Some(speed) = session.tracker.state().fan_speed {
                        report(
                            "set fan speed",
                            self.inner.store.set(PRINTER_FAN_SPEED, speed, None),
                        );
                    }
                }
                _ => {}
            }

            match session.phase {
                SessionPhase::Active => session.active_label.clone(),
                _ => None,
            }
        };

        if let Some(label) = label {
            self.refresh_job_times(&label);
        }
    }

    // The host query runs without the session lock; results only land if the
    // label is still the active one.
    fn refresh_job_times(&self, label: &str) {
        let Some(data) = self.inner.job_data.current_job_data() else {
            debug!("No current job data from host");
            return;
        };

        let missing = data.missing_fields();
        if !missing.is_empty() {
            debug!("{}", DaemonError::HostQueryIncomplete(missing));
        }

        let session = self.inner.session.lock();
        if session.phase != SessionPhase::Active || session.active_label.as_deref() != Some(label) {
            return;
        }

        let store = &self.inner.store;
        let updates = [
            (JOB_TIME_ELAPSED_SECONDS, data.progress.print_time),
            (JOB_TIME_LEFT_ESTIMATE_SECONDS, data.progress.print_time_left),
            (JOB_TIME_EST_SECONDS, data.job.estimated_print_time),
        ];
        for (name, value) in updates {
            if let Some(value) = value {
                report("set job time", store.set(name, value, Some(label)));
            }
        }
    }

    /// End the session with `outcome` and schedule the delayed teardown.
    pub fn on_print_finished(&self, outcome: PrintOutcome) {
        let inner = &self.inner;
        report("count print outcome", inner.store.increment(outcome.counter(), 1.0));

        let mut session = inner.session.lock();
        match session.phase {
            SessionPhase::Active => {}
            SessionPhase::Completing => {
                warn!("Print {} for a job that already ended, ignoring", outcome);
                return;
            }
            SessionPhase::Idle => {
                match session.interrupted_at.take() {
                    // Already torn down when the printer went offline
                    Some(started_at) => inner.add_print_time(started_at),
                    None => warn!("Print {} without a started print", outcome),
                }
                return;
            }
        }

        if let Some(started_at) = session.started_at {
            inner.add_print_time(started_at);
        }

        let weak: Weak<Inner> = Arc::downgrade(inner);
        let handle = inner.scheduler.schedule(
            inner.config.teardown_delay,
            Box::new(move |handle| {
                if let Some(inner) = weak.upgrade() {
                    inner.fire_teardown(handle);
                }
            }),
        );

        session.phase = SessionPhase::Completing;
        session.pending_teardown = Some(handle);
        info!(
            "Print {}, teardown in {:?}",
            outcome, inner.config.teardown_delay
        );
    }

    /// Record a printer state change; going offline tears down at once.
    pub fn on_printer_state_changed(&self, payload: &Map<String, Value>) {
        let inner = &self.inner;

        if payload.get("state_id").and_then(Value::as_str) == Some(OFFLINE_STATE_ID) {
            let mut session = inner.session.lock();
            if let Some(handle) = session.pending_teardown.take() {
                // Forfeit the timer; its later firing must not apply twice
                if !handle.claim() {
                    debug!("Pending teardown already resolved");
                }
            }
            info!("Printer offline, tearing down session");
            if session.phase == SessionPhase::Active {
                session.interrupted_at = session.started_at;
            }
            inner.teardown(&mut session);
            drop(session);

            report("clear temperatures", inner.store.clear(PRINTER_TEMPERATURES_ACTUAL));
            report("clear temperatures", inner.store.clear(PRINTER_TEMPERATURES_TARGET));
        }

        let state: BTreeMap<String, String> = payload
            .iter()
            .map(|(key, value)| (key.clone(), label_value(value)))
            .collect();
        report("replace printer state", inner.store.replace(PRINTER_STATE, &state));
    }

    pub fn on_temperatures(&self, readings: &BTreeMap<String, TemperatureReading>) {
        let store = &self.inner.store;
        for (identifier, reading) in readings {
            if let Some(actual) = reading.actual {
                report(
                    "set actual temperature",
                    store.set(PRINTER_TEMPERATURES_ACTUAL, actual, Some(identifier)),
                );
            }
            if let Some(target) = reading.target {
                report(
                    "set target temperature",
                    store.set(PRINTER_TEMPERATURES_TARGET, target, Some(identifier)),
                );
            }
        }

        if let Some(celsius) = self.inner.core_probe.lock().sample() {
            report(
                "set core temperature",
                store.set(SERVER_CORE_TEMPERATURE, celsius, None),
            );
        }
    }

    pub fn on_client_opened(&self) {
        let mut clients = self.inner.clients.lock();
        *clients += 1;
        report(
            "count client",
            self.inner.store.set(SERVER_CLIENTS, *clients as f64, None),
        );
    }

    pub fn on_client_closed(&self) {
        let mut clients = self.inner.clients.lock();
        if *clients == 0 {
            warn!("Client closed with no clients connected");
            return;
        }
        *clients -= 1;
        report(
            "count client",
            self.inner.store.set(SERVER_CLIENTS, *clients as f64, None),
        );
    }

    pub fn on_capture_done(&self) {
        report("count timelapse", self.inner.store.increment(SERVER_TIMELAPSES, 1.0));
    }

    /// Progress of the printing file. The path becomes the job's label.
    pub fn on_job_progress(&self, path: &str, progress: f64) {
        let inner = &self.inner;
        let mut session = inner.session.lock();

        match session.phase {
            SessionPhase::Idle => {
                debug!("Ignoring progress for {} outside a print", path);
                return;
            }
            SessionPhase::Completing if session.active_label.as_deref() != Some(path) => {
                debug!("Ignoring progress for {} after the job ended", path);
                return;
            }
            SessionPhase::Completing => {}
            SessionPhase::Active => {
                if let Some(previous) = session.active_label.as_deref() {
                    if previous != path {
                        inner.remove_job_labels(previous);
                    }
                }
                session.active_label = Some(path.to_string());
            }
        }

        report(
            "set job progress",
            inner.store.set(JOB_PROGRESS, progress, Some(path)),
        );
    }

    /// Progress of a slicing run. Finished slices are removed after a delay.
    pub fn on_slice_progress(&self, source_path: &str, progress: f64) {
        let inner = &self.inner;
        let mut removals = inner.slice_removals.lock();

        // Fresh progress for this path supersedes any earlier removal
        if let Some(handle) = removals.remove(source_path) {
            handle.cancel();
        }

        report(
            "set slice progress",
            inner
                .store
                .set(SERVER_SLICE_PROGRESS, progress, Some(source_path)),
        );

        if progress >= 100.0 {
            let weak = Arc::downgrade(inner);
            let path = source_path.to_string();
            let handle = inner.scheduler.schedule(
                inner.config.slice_teardown_delay,
                Box::new(move |handle| {
                    if let Some(inner) = weak.upgrade() {
                        inner.fire_slice_removal(&path, handle);
                    }
                }),
            );
            removals.insert(source_path.to_string(), handle);
        }
    }

    /// Merge `fields` into the exported server info.
    pub fn record_server_info(&self, fields: BTreeMap<String, String>) {
        let mut info = self.inner.server_info.lock();
        info.extend(fields);
        report(
            "replace server info",
            self.inner.store.replace(SERVER_INFO, &info),
        );
    }
}

impl std::fmt::Debug for PrintSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.inner.session.lock();
        f.debug_struct("PrintSessionController")
            .field("phase", &session.phase)
            .field("active_label", &session.active_label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostJobData;
    use crate::scheduler::{ManualClock, ManualScheduler};
    use printmon_metrics::register_printer_metrics;

    fn controller() -> (PrintSessionController, Arc<ManualScheduler>) {
        let store = Arc::new(MetricsStore::new());
        register_printer_metrics(&store).unwrap();
        let clock = Arc::new(ManualClock::new());
        let scheduler = Arc::new(ManualScheduler::new(Arc::clone(&clock)));
        let controller = PrintSessionController::new(
            store,
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            clock,
            Arc::new(HostJobData::new()),
            CoreTemperatureProbe::disabled(),
            ControllerConfig::default(),
        );
        (controller, scheduler)
    }

    fn value(controller: &PrintSessionController, name: &str) -> f64 {
        controller.store().value(name, None).unwrap().unwrap()
    }

    #[test]
    fn test_phase_transitions() {
        let (controller, scheduler) = controller();
        assert_eq!(controller.phase(), SessionPhase::Idle);

        controller.on_print_started();
        assert_eq!(controller.phase(), SessionPhase::Active);

        controller.on_print_finished(PrintOutcome::Done);
        assert_eq!(controller.phase(), SessionPhase::Completing);

        scheduler.advance(Duration::from_secs(30));
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_duplicate_terminal_event_schedules_once() {
        let (controller, scheduler) = controller();
        controller.on_print_started();
        controller.on_print_finished(PrintOutcome::Failed);
        controller.on_print_finished(PrintOutcome::Failed);

        assert_eq!(scheduler.pending(), 1);
        assert_eq!(value(&controller, FAILED_PRINTS), 2.0);
    }

    #[test]
    fn test_lines_while_idle_count_towards_printer_only() {
        let (controller, _) = controller();
        controller.on_command("G1 X0", CommandPhase::Sent);
        controller.on_command("G1 X40", CommandPhase::Sent);

        assert_eq!(value(&controller, PRINTER_TRAVEL_X), 40.0);
        assert_eq!(value(&controller, JOB_TRAVEL_X), 0.0);
    }

    #[test]
    fn test_unsent_lines_ignored() {
        let (controller, _) = controller();
        controller.on_print_started();
        controller.on_command("G1 X0", CommandPhase::Sent);
        controller.on_command("G1 X40", CommandPhase::Queued);

        assert_eq!(value(&controller, PRINTER_TRAVEL_X), 0.0);
        assert_eq!(controller.job_totals().travel_x, 0.0);
    }

    #[test]
    fn test_fan_speed_gauge() {
        let (controller, _) = controller();
        controller.on_command("M106 S200", CommandPhase::Sent);
        assert_eq!(value(&controller, PRINTER_FAN_SPEED), 200.0);

        controller.on_command("M107", CommandPhase::Sent);
        assert_eq!(value(&controller, PRINTER_FAN_SPEED), 0.0);
    }

    #[test]
    fn test_job_progress_ignored_while_idle() {
        let (controller, _) = controller();
        controller.on_job_progress("a.gcode", 10.0);
        assert_eq!(controller.active_label(), None);
        assert!(controller.store().labels(JOB_PROGRESS).unwrap().is_empty());
    }

    #[test]
    fn test_client_count_never_negative() {
        let (controller, _) = controller();
        controller.on_client_closed();
        assert_eq!(value(&controller, SERVER_CLIENTS), 0.0);

        controller.on_client_opened();
        controller.on_client_opened();
        controller.on_client_closed();
        assert_eq!(value(&controller, SERVER_CLIENTS), 1.0);
    }

    #[test]
    fn test_concurrent_client_closes_stop_at_zero() {
        let (controller, _) = controller();
        for _ in 0..4 {
            controller.on_client_opened();
        }

        let threads: Vec<_> = (0..16)
            .map(|_| {
                let controller = controller.clone();
                std::thread::spawn(move || controller.on_client_closed())
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(value(&controller, SERVER_CLIENTS), 0.0);
        controller.on_client_opened();
        assert_eq!(value(&controller, SERVER_CLIENTS), 1.0);
    }

    #[test]
    fn test_printer_state_values_are_stringified() {
        let (controller, _) = controller();
        let payload: Map<String, Value> =
            serde_json::from_str(r#"{"state_id":"OPERATIONAL","retries":3,"error":null}"#).unwrap();
        controller.on_printer_state_changed(&payload);

        let state = controller.store().info(PRINTER_STATE).unwrap().unwrap();
        assert_eq!(state["state_id"], "OPERATIONAL");
        assert_eq!(state["retries"], "3");
        assert_eq!(state["error"], "");
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_server_info_merges() {
        let (controller, _) = controller();
        let mut startup = BTreeMap::new();
        startup.insert("host".to_string(), "OctoPrint".to_string());
        startup.insert("platform".to_string(), "linux".to_string());
        controller.record_server_info(startup);

        controller.handle_event(HostEvent::ServerInfo {
            octoprint_version: Some("1.10.2".to_string()),
            host: Some("workshop".to_string()),
        });

        let info = controller.store().info(SERVER_INFO).unwrap().unwrap();
        assert_eq!(info["host"], "workshop");
        assert_eq!(info["platform"], "linux");
        assert_eq!(info["octoprint_version"], "1.10.2");
    }

    #[test]
    fn test_capture_done_counts_timelapse() {
        let (controller, _) = controller();
        controller.on_lifecycle(LifecycleKind::CaptureDone, &Map::new());
        controller.on_lifecycle(LifecycleKind::Other, &Map::new());
        assert_eq!(value(&controller, SERVER_TIMELAPSES), 1.0);
    }
}
