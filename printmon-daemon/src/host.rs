//! Live job data supplied by the print host

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Progress section of the host's current data. Every field may be null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    #[serde(default)]
    pub print_time: Option<f64>,
    #[serde(default)]
    pub print_time_left: Option<f64>,
    #[serde(default)]
    pub completion: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    #[serde(default)]
    pub estimated_print_time: Option<f64>,
}

/// Snapshot of the host's "current data" for the running job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    #[serde(default)]
    pub progress: ProgressData,
    #[serde(default)]
    pub job: JobInfo,
}

impl JobData {
    /// Names of the timing fields the host left out.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.progress.print_time.is_none() {
            missing.push("progress.printTime");
        }
        if self.progress.print_time_left.is_none() {
            missing.push("progress.printTimeLeft");
        }
        if self.job.estimated_print_time.is_none() {
            missing.push("job.estimatedPrintTime");
        }
        missing
    }
}

/// Where the controller asks for the running job's timings.
pub trait JobDataSource: Send + Sync {
    fn current_job_data(&self) -> Option<JobData>;
}

/// Latest job data pushed by the host shim.
#[derive(Debug, Default)]
pub struct HostJobData {
    latest: RwLock<Option<JobData>>,
}

impl HostJobData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, data: JobData) {
        *self.latest.write() = Some(data);
    }

    pub fn clear(&self) {
        *self.latest.write() = None;
    }
}

impl JobDataSource for HostJobData {
    fn current_job_data(&self) -> Option<JobData> {
        self.latest.read().clone()
    }
}
