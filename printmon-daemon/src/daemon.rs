//! Wiring of store, controller and host data cache

use std::collections::BTreeMap;
use std::sync::Arc;

use printmon_metrics::{register_printer_metrics, MetricsStore};
use tracing::info;

use crate::config::DaemonConfig;
use crate::controller::PrintSessionController;
use crate::error::Result;
use crate::events::{HostEvent, LifecycleKind};
use crate::host::HostJobData;
use crate::peripheral::CoreTemperatureProbe;
use crate::scheduler::{SystemClock, TokioScheduler};

/// Everything a running daemon shares between its listeners.
pub struct Daemon {
    store: Arc<MetricsStore>,
    controller: PrintSessionController,
    job_data: Arc<HostJobData>,
}

impl Daemon {
    /// Build a daemon whose timers run on the current tokio runtime.
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        let store = Arc::new(MetricsStore::new());
        register_printer_metrics(&store)?;

        let job_data = Arc::new(HostJobData::new());
        let core_probe = if config.core_temperature {
            CoreTemperatureProbe::system()
        } else {
            CoreTemperatureProbe::disabled()
        };

        let controller = PrintSessionController::new(
            Arc::clone(&store),
            Arc::new(TokioScheduler::current()),
            Arc::new(SystemClock::new()),
            job_data.clone(),
            core_probe,
            config.controller_config(),
        );

        Ok(Self {
            store,
            controller,
            job_data,
        })
    }

    pub fn store(&self) -> Arc<MetricsStore> {
        Arc::clone(&self.store)
    }

    pub fn controller(&self) -> &PrintSessionController {
        &self.controller
    }

    pub fn handle_event(&self, event: HostEvent) {
        match event {
            HostEvent::CurrentData { data } => self.job_data.update(data),
            HostEvent::Lifecycle {
                event: LifecycleKind::PrintStarted,
                ..
            } => {
                // Timings cached for the previous job must not leak into this one
                self.job_data.clear();
                self.controller.handle_event(event);
            }
            other => self.controller.handle_event(other),
        }
    }

    /// Publish what the daemon knows about its host before the host reports in.
    pub fn publish_startup_info(&self, host_name: &str) {
        let mut fields = BTreeMap::new();
        fields.insert(
            "exporter_version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        fields.insert("host".to_string(), host_name.to_string());
        fields.insert("platform".to_string(), std::env::consts::OS.to_string());
        fields.insert(
            "app_start".to_string(),
            chrono::Utc::now().timestamp().to_string(),
        );
        self.controller.record_server_info(fields);
        info!("Server info published for {}", host_name);
    }
}
