//! End-to-end tracking behaviour over realistic line sequences.

use printmon_gcode::{EventKind, MotionTracker};

fn feed(tracker: &mut MotionTracker, lines: &[&str]) -> Vec<EventKind> {
    lines.iter().map(|line| tracker.process_line(line)).collect()
}

#[test]
fn test_absolute_travel_is_sum_of_consecutive_differences() {
    let mut tracker = MotionTracker::new();
    feed(&mut tracker, &["G1 X10", "G1 X25", "G1 X18"]);

    assert_eq!(tracker.totals().travel_x, 22.0, "15 + 7, not 10 + 25 + 18");
    assert_eq!(tracker.state().position.x, Some(18.0));
}

#[test]
fn test_relative_travel_is_sum_of_magnitudes() {
    let mut tracker = MotionTracker::new();
    feed(
        &mut tracker,
        &["G91", "G1 X5 Y-2", "G1 X-3 Y4", "G1 Z0.2", "G1 Z-0.2"],
    );

    let totals = tracker.totals();
    assert_eq!(totals.travel_x, 8.0);
    assert_eq!(totals.travel_y, 6.0);
    assert!((totals.travel_z - 0.4).abs() < 1e-9);
    // No absolute baseline was ever given
    assert_eq!(tracker.state().position.x, None);
}

#[test]
fn test_relative_moves_track_position_once_baseline_known() {
    let mut tracker = MotionTracker::new();
    feed(&mut tracker, &["G1 X10", "G91", "G1 X-4", "G1 X1.5"]);

    assert_eq!(tracker.state().position.x, Some(7.5));
    assert_eq!(tracker.totals().travel_x, 5.5);
}

#[test]
fn test_extrusion_mode_is_independent_of_axis_mode() {
    let mut tracker = MotionTracker::new();
    feed(&mut tracker, &["M83"]);

    assert!(!tracker.state().absolute_extrusion);
    assert!(tracker.state().absolute_axes, "M83 must not touch axis mode");

    feed(&mut tracker, &["G1 X10 E2", "G1 X20 E2", "G1 X15 E-1"]);
    let totals = tracker.totals();
    assert_eq!(totals.travel_x, 15.0, "X stays absolute");
    assert_eq!(totals.extrusion, 5.0, "E is relative: 2 + 2 + |-1|");

    feed(&mut tracker, &["G91"]);
    assert!(!tracker.state().absolute_axes);
    assert!(!tracker.state().absolute_extrusion);

    feed(&mut tracker, &["G90"]);
    assert!(tracker.state().absolute_axes);
    assert!(
        !tracker.state().absolute_extrusion,
        "G90 must not touch extrusion mode"
    );
}

#[test]
fn test_set_position_redefines_origin_without_travel() {
    let mut tracker = MotionTracker::new();
    feed(&mut tracker, &["G1 X10", "G1 X30"]);
    assert_eq!(tracker.totals().travel_x, 20.0);

    assert_eq!(tracker.process_line("G92 X0"), EventKind::CoordinateReset);
    assert_eq!(tracker.state().position.x, Some(0.0));
    assert_eq!(tracker.totals().travel_x, 20.0);

    feed(&mut tracker, &["G1 X5"]);
    assert_eq!(tracker.totals().travel_x, 25.0);
}

#[test]
fn test_extruder_reset_between_layers() {
    let mut tracker = MotionTracker::new();
    feed(
        &mut tracker,
        &["G92 E0", "G1 X1 E4", "G92 E0", "G1 X2 E3", "G92 E0", "G1 X3 E1.5"],
    );
    assert_eq!(tracker.totals().extrusion, 8.5);
}

#[test]
fn test_fan_speed_transitions() {
    let mut tracker = MotionTracker::new();

    tracker.process_line("M106");
    assert_eq!(tracker.state().fan_speed, Some(255.0));

    tracker.process_line("M107");
    assert_eq!(tracker.state().fan_speed, Some(0.0));

    tracker.process_line("M106 S64");
    tracker.process_line("G1 X1");
    tracker.process_line("M104 S210");
    assert_eq!(tracker.state().fan_speed, Some(64.0), "unrelated lines keep fan speed");
}

#[test]
fn test_reference_sequence() {
    let mut tracker = MotionTracker::new();
    let events = feed(
        &mut tracker,
        &["G90", "G1 X10 E1 F1500", "G1 X20 E3", "M106 S128", "M107"],
    );

    assert_eq!(
        events,
        vec![
            EventKind::CoordinateModeSwitch,
            EventKind::Movement,
            EventKind::Movement,
            EventKind::FanSpeed,
            EventKind::FanSpeed,
        ]
    );

    let state = tracker.state();
    assert_eq!(state.totals.travel_x, 10.0);
    assert_eq!(state.totals.extrusion, 2.0);
    assert_eq!(state.fan_speed, Some(0.0));
    assert_eq!(state.feed_rate, Some(1500.0));
}

#[test]
fn test_reset_zeroes_counters_for_next_session() {
    let mut tracker = MotionTracker::new();
    feed(&mut tracker, &["G1 X0 E0", "G1 X50 E10"]);
    assert_eq!(tracker.totals().travel_x, 50.0);

    tracker.reset();
    assert_eq!(tracker.totals().travel_x, 0.0);
    assert_eq!(tracker.totals().extrusion, 0.0);

    // First move after reset is a baseline again
    feed(&mut tracker, &["G1 X60"]);
    assert_eq!(tracker.totals().travel_x, 0.0);
}
