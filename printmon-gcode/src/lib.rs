//! G-code telemetry for printmon
//!
//! Turns the stream of command lines sent to a printer into cumulative
//! per-axis travel, extrusion and fan duty. This is bookkeeping for
//! monitoring, not an interpreter: no planning, no tool offsets.
//!
//! ```
//! use printmon_gcode::{EventKind, MotionTracker};
//!
//! let mut tracker = MotionTracker::new();
//! tracker.process_line("G1 X10 E1");
//! assert_eq!(tracker.process_line("G1 X25 E3"), EventKind::Movement);
//! assert_eq!(tracker.totals().travel_x, 15.0);
//! assert_eq!(tracker.totals().extrusion, 2.0);
//! ```

pub mod error;
pub mod parser;
pub mod tracker;

pub use error::{GcodeError, Result};
pub use parser::{parse_line, Axis, AxisValues, Command, ModeSwitch, MoveArgs, FAN_SPEED_MAX};
pub use tracker::{EventKind, MotionTotals, MotionTracker, ParserState};
