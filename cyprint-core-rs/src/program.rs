//! Offline program tools: kernel-free analysis and the demo print

use crate::config::KinematicsConfig;
use crate::gcode::{parse_line, Instruction, Interpreter};
use crate::planner::KinematicPlanner;
use crate::types::Position;
use serde::Serialize;
use std::f64::consts::TAU;

/// Totals for a whole program, timed with the same planner the printer uses
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgramSummary {
    pub lines: usize,
    /// Lines that carried code
    pub commands: usize,
    pub moves: usize,
    /// Moves skipped because their target or timing overflowed
    pub rejected_moves: usize,
    /// mm
    pub total_distance: f64,
    /// Sum of move times (s)
    pub total_time: f64,
    /// mm/s
    pub avg_speed: f64,
    /// mm/min
    pub avg_feedrate: f64,
    /// mm of filament requested
    pub extrusion: f64,
    pub dwells: usize,
    pub dwell_time: f64,
    pub temperature_changes: usize,
    pub unknown: usize,
    pub dropped_tokens: usize,
}

/// Walk `lines` through the interpreter and planner without simulating
pub fn analyze_program<S: AsRef<str>>(
    lines: &[S],
    kinematics: &KinematicsConfig,
) -> ProgramSummary {
    let mut interpreter = Interpreter::new();
    let mut planner = KinematicPlanner::new(kinematics);
    let mut position = Position::ORIGIN;
    let mut summary = ProgramSummary {
        lines: lines.len(),
        ..ProgramSummary::default()
    };
    let mut feedrate_sum = 0.0;

    for line in lines {
        let Some(command) = parse_line(line.as_ref()) else {
            continue;
        };
        summary.commands += 1;
        summary.dropped_tokens += command.dropped.len();

        match interpreter.interpret(&command, &position) {
            Instruction::Move(motion) => {
                let plan = planner.plan(position.xyz(), motion.target.xyz(), motion.feedrate);
                if !motion.target.is_finite()
                    || !motion.extrude.is_finite()
                    || !plan.is_finite()
                {
                    summary.rejected_moves += 1;
                    continue;
                }
                summary.moves += 1;
                summary.total_distance += plan.distance;
                summary.total_time += plan.move_time;
                summary.extrusion += motion.extrude;
                feedrate_sum += plan.feedrate;
                position = motion.target;
            }
            Instruction::Dwell { seconds } => {
                summary.dwells += 1;
                summary.dwell_time += seconds;
            }
            Instruction::SetTemperature { .. } => summary.temperature_changes += 1,
            Instruction::Home => position = Position::ORIGIN,
            Instruction::SetMode(mode) => interpreter.set_mode(mode),
            Instruction::SetPosition { x, y, z, e } => {
                position = Position::new(
                    x.unwrap_or(position.x),
                    y.unwrap_or(position.y),
                    z.unwrap_or(position.z),
                    e.unwrap_or(position.e),
                );
            }
            Instruction::SetFeedrate(feedrate) => planner.set_feedrate(feedrate),
            Instruction::Unknown { .. } => summary.unknown += 1,
        }
    }

    if summary.total_time > 0.0 {
        summary.avg_speed = summary.total_distance / summary.total_time;
    }
    if summary.moves > 0 {
        summary.avg_feedrate = feedrate_sum / summary.moves as f64;
    }
    summary
}

/// Spiral demo print with `movements` moves
pub fn demo_program(movements: usize) -> Vec<String> {
    let mut program = vec![
        "M104 S200".to_string(),
        "M140 S60".to_string(),
        "G28".to_string(),
    ];

    let mut z = 0.0;
    for i in 0..movements {
        let step = i as f64;
        if i % 100 == 0 {
            z = (i / 100 + 1) as f64 * 0.2;
            program.push(format!("G1 Z{z:.2} F300"));
        }

        let angle = (step * 0.1) % TAU;
        let radius = 30.0 + 10.0 * (step * 0.05).sin();
        let (x, y) = (radius * angle.cos(), radius * angle.sin());
        // Every twentieth move is a faster travel move
        let speed = if i % 20 == 0 { 1500 } else { 800 };
        program.push(format!("G1 X{x:.2} Y{y:.2} Z{z:.2} F{speed}"));

        if i % 50 == 0 {
            program.push(format!("M104 S{}", 200 + i % 20));
        }
    }

    program.extend(["M104 S0", "M140 S0", "G28"].map(String::from));
    program
}
