//! Stateless classification of a single outbound command line.
//!
//! Only the handful of commands that matter for travel/extrusion/fan
//! bookkeeping are recognised; everything else classifies as `None`.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{GcodeError, Result};

/// Fan duty reported for `M106` without an `S` argument.
pub const FAN_SPEED_MAX: f64 = 255.0;

/// Axes the tracker integrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
    E,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::E];

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::E => 'E',
        }
    }
}

/// One optional value per axis. `Some(0.0)` and `None` are distinct.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisValues {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
}

impl AxisValues {
    pub fn get(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::E => self.e,
        }
    }

    pub fn set(&mut self, axis: Axis, value: Option<f64>) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
            Axis::E => self.e = value,
        }
    }

    pub fn is_empty(&self) -> bool {
        Axis::ALL.iter().all(|axis| self.get(*axis).is_none())
    }
}

/// Arguments of a `G0`/`G1` linear move.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveArgs {
    pub targets: AxisValues,
    pub feed_rate: Option<f64>,
}

/// Coordinate-mode commands. Extrusion and positioning modes are separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSwitch {
    /// `M82`
    AbsoluteExtrusion,
    /// `M83`
    RelativeExtrusion,
    /// `G90`
    AbsolutePositioning,
    /// `G91`
    RelativePositioning,
}

/// A classified command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Move(MoveArgs),
    FanSpeed(f64),
    ModeSwitch(ModeSwitch),
    SetPosition(AxisValues),
}

struct Patterns {
    movement: Regex,
    fan_on: Regex,
    fan_off: Regex,
    mode_switch: Regex,
    set_position: Regex,
    x: Regex,
    y: Regex,
    z: Regex,
    e: Regex,
    feed_rate: Regex,
    fan_speed: Regex,
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static G-code pattern must compile")
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        movement: compile(r"^G[01]\s"),
        fan_on: compile(r"^M106(?:\s|$)"),
        fan_off: compile(r"^M107(?:[^0-9.]|$)"),
        mode_switch: compile(r"^(M82|M83|G90|G91)(?:[^0-9.]|$)"),
        set_position: compile(r"^G92\s"),
        x: compile(r"\sX(-*\d+\.*\d*)"),
        y: compile(r"\sY(-*\d+\.*\d*)"),
        z: compile(r"\sZ(-*\d+\.*\d*)"),
        e: compile(r"\sE(-*\d+\.*\d*)"),
        feed_rate: compile(r"\sF(\d+\.*\d*)"),
        fan_speed: compile(r"\sS(\d+\.*\d*)"),
    })
}

/// Drop a trailing `;` comment and surrounding whitespace.
fn strip_comment(line: &str) -> &str {
    line.split(';').next().unwrap_or_default().trim()
}

/// Read the last occurrence of a word. A word that matches the pattern but
/// is not a number (`X--5`, `X1..2`) is ambiguous rather than absent.
fn read_word(pattern: &Regex, letter: char, line: &str) -> Result<Option<f64>> {
    let Some(raw) = pattern
        .captures_iter(line)
        .last()
        .and_then(|caps| caps.get(1))
    else {
        return Ok(None);
    };

    raw.as_str()
        .parse::<f64>()
        .map(Some)
        .map_err(|_| GcodeError::ParseAmbiguity {
            line: line.to_string(),
            axis: letter,
            raw: raw.as_str().to_string(),
        })
}

fn axis_pattern(p: &Patterns, axis: Axis) -> &Regex {
    match axis {
        Axis::X => &p.x,
        Axis::Y => &p.y,
        Axis::Z => &p.z,
        Axis::E => &p.e,
    }
}

fn read_axes(line: &str) -> Result<AxisValues> {
    let p = patterns();
    let mut values = AxisValues::default();
    for axis in Axis::ALL {
        values.set(axis, read_word(axis_pattern(p, axis), axis.letter(), line)?);
    }
    Ok(values)
}

/// Classify one line. `Ok(None)` means the line is irrelevant to tracking.
pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let code = strip_comment(line);
    if code.is_empty() {
        return Ok(None);
    }

    let p = patterns();

    if p.movement.is_match(code) {
        return Ok(Some(Command::Move(MoveArgs {
            targets: read_axes(code)?,
            feed_rate: read_word(&p.feed_rate, 'F', code)?,
        })));
    }

    if p.fan_on.is_match(code) {
        let speed = read_word(&p.fan_speed, 'S', code)?.unwrap_or(FAN_SPEED_MAX);
        return Ok(Some(Command::FanSpeed(speed.clamp(0.0, FAN_SPEED_MAX))));
    }

    if p.fan_off.is_match(code) {
        return Ok(Some(Command::FanSpeed(0.0)));
    }

    if let Some(caps) = p.mode_switch.captures(code) {
        let mode = match &caps[1] {
            "M82" => ModeSwitch::AbsoluteExtrusion,
            "M83" => ModeSwitch::RelativeExtrusion,
            "G90" => ModeSwitch::AbsolutePositioning,
            _ => ModeSwitch::RelativePositioning,
        };
        return Ok(Some(Command::ModeSwitch(mode)));
    }

    if p.set_position.is_match(code) {
        return Ok(Some(Command::SetPosition(read_axes(code)?)));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Option<Command> {
        parse_line(line).expect("line should parse")
    }

    #[test]
    fn test_rapid_and_controlled_moves_are_equivalent() {
        let rapid = parse("G0 X10 Y-2.5 F3000");
        let controlled = parse("G1 X10 Y-2.5 F3000");
        assert_eq!(rapid, controlled);

        match rapid {
            Some(Command::Move(args)) => {
                assert_eq!(args.targets.x, Some(10.0));
                assert_eq!(args.targets.y, Some(-2.5));
                assert_eq!(args.targets.z, None);
                assert_eq!(args.targets.e, None);
                assert_eq!(args.feed_rate, Some(3000.0));
            }
            other => panic!("Expected move, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_argument_is_not_missing() {
        match parse("G1 Z0 E0") {
            Some(Command::Move(args)) => {
                assert_eq!(args.targets.z, Some(0.0));
                assert_eq!(args.targets.e, Some(0.0));
                assert_eq!(args.targets.x, None);
            }
            other => panic!("Expected move, got {:?}", other),
        }
    }

    #[test]
    fn test_move_requires_separator() {
        assert_eq!(parse("G10"), None);
        assert_eq!(parse("G28 X0"), None);
    }

    #[test]
    fn test_comment_is_ignored() {
        match parse("G1 X5 ; then X99") {
            Some(Command::Move(args)) => assert_eq!(args.targets.x, Some(5.0)),
            other => panic!("Expected move, got {:?}", other),
        }
        assert_eq!(parse("; G1 X5"), None);
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn test_fan_commands() {
        assert_eq!(parse("M106 S128"), Some(Command::FanSpeed(128.0)));
        assert_eq!(parse("M106"), Some(Command::FanSpeed(FAN_SPEED_MAX)));
        assert_eq!(parse("M106 P1"), Some(Command::FanSpeed(FAN_SPEED_MAX)));
        assert_eq!(parse("M106 S0"), Some(Command::FanSpeed(0.0)));
        assert_eq!(parse("M106 S999"), Some(Command::FanSpeed(FAN_SPEED_MAX)));
        assert_eq!(parse("M107"), Some(Command::FanSpeed(0.0)));
        assert_eq!(parse("M107 P1"), Some(Command::FanSpeed(0.0)));
        assert_eq!(parse("M1070"), None);
    }

    #[test]
    fn test_mode_switches() {
        assert_eq!(
            parse("M82"),
            Some(Command::ModeSwitch(ModeSwitch::AbsoluteExtrusion))
        );
        assert_eq!(
            parse("M83"),
            Some(Command::ModeSwitch(ModeSwitch::RelativeExtrusion))
        );
        assert_eq!(
            parse("G90"),
            Some(Command::ModeSwitch(ModeSwitch::AbsolutePositioning))
        );
        assert_eq!(
            parse("G91 ; relative"),
            Some(Command::ModeSwitch(ModeSwitch::RelativePositioning))
        );
        assert_eq!(parse("G900"), None);
        assert_eq!(parse("M82.1"), None);
    }

    #[test]
    fn test_set_position() {
        match parse("G92 E0") {
            Some(Command::SetPosition(values)) => {
                assert_eq!(values.e, Some(0.0));
                assert_eq!(values.x, None);
            }
            other => panic!("Expected set position, got {:?}", other),
        }
        assert_eq!(parse("G92"), None);
    }

    #[test]
    fn test_malformed_number_is_ambiguous() {
        let err = parse_line("G1 X--5").unwrap_err();
        assert!(matches!(err, GcodeError::ParseAmbiguity { axis: 'X', .. }));

        let err = parse_line("G92 E1..2").unwrap_err();
        assert!(matches!(err, GcodeError::ParseAmbiguity { axis: 'E', .. }));
    }

    #[test]
    fn test_unrelated_lines() {
        assert_eq!(parse("M104 S200"), None);
        assert_eq!(parse("T0"), None);
        assert_eq!(parse("G28"), None);
    }
}
