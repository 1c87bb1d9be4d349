//! Position integration over a stream of classified commands.

use tracing::debug;

use crate::parser::{self, Axis, AxisValues, Command, ModeSwitch, MoveArgs};

/// What a processed line turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Movement,
    FanSpeed,
    CoordinateModeSwitch,
    CoordinateReset,
    None,
}

/// Cumulative distances since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionTotals {
    pub travel_x: f64,
    pub travel_y: f64,
    pub travel_z: f64,
    pub extrusion: f64,
}

impl MotionTotals {
    /// Per-field growth since `earlier`, floored at zero.
    pub fn growth_since(&self, earlier: &MotionTotals) -> MotionTotals {
        MotionTotals {
            travel_x: (self.travel_x - earlier.travel_x).max(0.0),
            travel_y: (self.travel_y - earlier.travel_y).max(0.0),
            travel_z: (self.travel_z - earlier.travel_z).max(0.0),
            extrusion: (self.extrusion - earlier.extrusion).max(0.0),
        }
    }

    fn accumulate(&mut self, axis: Axis, delta: f64) {
        match axis {
            Axis::X => self.travel_x += delta,
            Axis::Y => self.travel_y += delta,
            Axis::Z => self.travel_z += delta,
            Axis::E => self.extrusion += delta,
        }
    }
}

/// Everything the tracker knows about the machine for the current session.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserState {
    /// `None` until an absolute reference has been seen for that axis.
    pub position: AxisValues,
    pub totals: MotionTotals,
    pub absolute_extrusion: bool,
    pub absolute_axes: bool,
    pub feed_rate: Option<f64>,
    pub fan_speed: Option<f64>,
}

impl Default for ParserState {
    fn default() -> Self {
        Self {
            position: AxisValues::default(),
            totals: MotionTotals::default(),
            absolute_extrusion: true,
            absolute_axes: true,
            feed_rate: None,
            fan_speed: None,
        }
    }
}

impl ParserState {
    fn is_absolute(&self, axis: Axis) -> bool {
        match axis {
            Axis::E => self.absolute_extrusion,
            _ => self.absolute_axes,
        }
    }
}

/// Travel contributed by one axis word, and the axis position afterwards.
///
/// An absolute target without a known position only establishes the
/// baseline. A relative offset always counts its magnitude, even when the
/// position it is relative to is unknown.
fn integrate(target: Option<f64>, current: Option<f64>, absolute: bool) -> (f64, Option<f64>) {
    let Some(target) = target else {
        return (0.0, current);
    };

    if absolute {
        let delta = current.map_or(0.0, |current| (current - target).abs());
        (delta, Some(target))
    } else {
        (target.abs(), current.map(|current| current + target))
    }
}

/// Streaming motion/extrusion tracker. One instance per print session.
#[derive(Debug, Clone, Default)]
pub struct MotionTracker {
    state: ParserState,
}

impl MotionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and apply one raw line.
    ///
    /// Lines with unreadable numeric arguments are dropped as a whole.
    pub fn process_line(&mut self, line: &str) -> EventKind {
        match parser::parse_line(line) {
            Ok(Some(command)) => self.apply(&command),
            Ok(None) => EventKind::None,
            Err(e) => {
                debug!("Ignoring G-code line: {}", e);
                EventKind::None
            }
        }
    }

    /// Apply an already classified command.
    pub fn apply(&mut self, command: &Command) -> EventKind {
        match command {
            Command::Move(args) => {
                self.apply_move(args);
                EventKind::Movement
            }
            Command::FanSpeed(speed) => {
                self.state.fan_speed = Some(*speed);
                EventKind::FanSpeed
            }
            Command::ModeSwitch(mode) => {
                match mode {
                    ModeSwitch::AbsoluteExtrusion => self.state.absolute_extrusion = true,
                    ModeSwitch::RelativeExtrusion => self.state.absolute_extrusion = false,
                    ModeSwitch::AbsolutePositioning => self.state.absolute_axes = true,
                    ModeSwitch::RelativePositioning => self.state.absolute_axes = false,
                }
                EventKind::CoordinateModeSwitch
            }
            Command::SetPosition(values) => {
                for axis in Axis::ALL {
                    if let Some(value) = values.get(axis) {
                        self.state.position.set(axis, Some(value));
                    }
                }
                EventKind::CoordinateReset
            }
        }
    }

    fn apply_move(&mut self, args: &MoveArgs) {
        for axis in Axis::ALL {
            let (delta, position) = integrate(
                args.targets.get(axis),
                self.state.position.get(axis),
                self.state.is_absolute(axis),
            );
            self.state.totals.accumulate(axis, delta);
            self.state.position.set(axis, position);
        }

        if let Some(feed_rate) = args.feed_rate {
            self.state.feed_rate = Some(feed_rate);
        }
    }

    /// Back to defaults: no positions, zero totals, absolute modes.
    pub fn reset(&mut self) {
        self.state = ParserState::default();
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    pub fn totals(&self) -> MotionTotals {
        self.state.totals
    }
}
