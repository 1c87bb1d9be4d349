//! printmon daemon library
//!
//! Host events in, scrape endpoint out. The host shim streams temperature
//! reports, sent G-code lines and lifecycle events over a Unix socket; the
//! `PrintSessionController` turns them into metrics that `server` exposes.

pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod events;
pub mod host;
pub mod ipc;
pub mod peripheral;
pub mod scheduler;
pub mod server;

pub use config::DaemonConfig;
pub use controller::{ControllerConfig, PrintOutcome, PrintSessionController, SessionPhase};
pub use daemon::Daemon;
pub use error::{DaemonError, Result};
pub use events::{CommandPhase, HostEvent, LifecycleKind, TemperatureReading};
pub use host::{HostJobData, JobData, JobDataSource};
pub use scheduler::{
    Clock, ManualClock, ManualScheduler, Scheduler, SystemClock, TaskHandle, TokioScheduler,
};
