use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::host::JobData;

/// Events the host shim writes to the event socket, one JSON object per line
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum HostEvent {
    /// Parsed temperature report, keyed by heater identifier
    #[serde(rename = "temperature")]
    Temperature {
        readings: BTreeMap<String, TemperatureReading>,
    },

    /// A command line on its way to the printer
    #[serde(rename = "gcode")]
    Gcode {
        line: String,
        #[serde(default)]
        phase: CommandPhase,
    },

    /// Host lifecycle event with its raw payload
    #[serde(rename = "lifecycle")]
    Lifecycle {
        event: LifecycleKind,
        #[serde(default)]
        payload: Map<String, Value>,
    },

    /// Print progress in percent for the file being printed
    #[serde(rename = "job_progress")]
    JobProgress {
        #[serde(default)]
        storage: String,
        path: String,
        progress: f64,
    },

    /// Slicing progress in percent for a source model
    #[serde(rename = "slice_progress")]
    SliceProgress { source_path: String, progress: f64 },

    /// Fresh answer to the host's current-data query
    #[serde(rename = "current_data")]
    CurrentData { data: JobData },

    /// Host identification, sent once the host has started
    #[serde(rename = "server_info")]
    ServerInfo {
        #[serde(default)]
        octoprint_version: Option<String>,
        #[serde(default)]
        host: Option<String>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct TemperatureReading {
    #[serde(default)]
    pub actual: Option<f64>,
    #[serde(default)]
    pub target: Option<f64>,
}

/// Stage of the host's send pipeline a command was observed at.
/// Only `Sent` lines reached the printer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandPhase {
    Queuing,
    Queued,
    Sending,
    #[default]
    Sent,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    ClientOpened,
    ClientClosed,
    PrinterStateChanged,
    PrintStarted,
    PrintDone,
    PrintFailed,
    PrintCancelled,
    CaptureDone,
    /// Any host event the daemon has no use for
    #[serde(other)]
    Other,
}

impl HostEvent {
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    /// Convert event to JSON string with newline
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcode_event_defaults_to_sent() {
        let event = HostEvent::from_json_line(r#"{"type":"gcode","line":"G1 X10"}"#).unwrap();
        assert_eq!(
            event,
            HostEvent::Gcode {
                line: "G1 X10".to_string(),
                phase: CommandPhase::Sent,
            }
        );
    }

    #[test]
    fn test_lifecycle_with_payload() {
        let line = r#"{"type":"lifecycle","event":"PrinterStateChanged","payload":{"state_id":"OFFLINE","state_string":"Offline"}}"#;
        match HostEvent::from_json_line(line).unwrap() {
            HostEvent::Lifecycle { event, payload } => {
                assert_eq!(event, LifecycleKind::PrinterStateChanged);
                assert_eq!(payload["state_id"], "OFFLINE");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_lifecycle_event() {
        let line = r#"{"type":"lifecycle","event":"FileAdded"}"#;
        match HostEvent::from_json_line(line).unwrap() {
            HostEvent::Lifecycle { event, payload } => {
                assert_eq!(event, LifecycleKind::Other);
                assert!(payload.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_temperature_readings_allow_nulls() {
        let line = r#"{"type":"temperature","readings":{"tool0":{"actual":210.5,"target":null},"bed":{"actual":60.1,"target":60}}}"#;
        let HostEvent::Temperature { readings } = HostEvent::from_json_line(line).unwrap() else {
            panic!("expected temperature event");
        };
        assert_eq!(readings["tool0"].target, None);
        assert_eq!(readings["bed"].target, Some(60.0));
    }

    #[test]
    fn test_json_line_has_newline() {
        let event = HostEvent::SliceProgress {
            source_path: "part.stl".to_string(),
            progress: 100.0,
        };
        let line = event.to_json_line().unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"type\":\"slice_progress\""));
        assert_eq!(HostEvent::from_json_line(&line).unwrap(), event);
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        assert!(HostEvent::from_json_line("{\"type\":\"gcode\"}").is_err());
        assert!(HostEvent::from_json_line("not json").is_err());
    }
}
