//! G-code interpretation
//!
//! Two stages. [`parse_line`] turns one line of text into a [`Command`]
//! without looking at any state; [`Interpreter::interpret`] resolves a
//! command against the positioning mode and the current position into an
//! [`Instruction`].
//!
//! Parsing is tolerant: comments after `;` are stripped, blank lines yield
//! nothing, and tokens that do not parse are dropped (and kept on the command
//! for diagnostics) instead of failing the line.

use crate::types::{Heater, Position, PositioningMode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Hotend target when M104 carries no S word (°C)
pub const DEFAULT_HOTEND_TARGET: f64 = 200.0;
/// Bed target when M140 carries no S word (°C)
pub const DEFAULT_BED_TARGET: f64 = 60.0;
/// G4 duration when P is missing or unusable (s)
pub const DEFAULT_DWELL: f64 = 1.0;

fn token_pattern() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"([A-Z])([^A-Z\s]*)").expect("token pattern is valid"))
}

// ============================================================================
// Commands
// ============================================================================

/// Primary G or M word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    G(u16),
    M(u16),
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::G(n) => write!(f, "G{n}"),
            Opcode::M(n) => write!(f, "M{n}"),
        }
    }
}

/// Parameter words understood by the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Params {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
    pub f: Option<f64>,
    pub s: Option<f64>,
    pub p: Option<f64>,
}

impl Params {
    /// Returns false for letters this model ignores
    fn set(&mut self, letter: char, value: f64) -> bool {
        let slot = match letter {
            'X' => &mut self.x,
            'Y' => &mut self.y,
            'Z' => &mut self.z,
            'E' => &mut self.e,
            'F' => &mut self.f,
            'S' => &mut self.s,
            'P' => &mut self.p,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    pub fn has_axes(&self) -> bool {
        self.x.is_some() || self.y.is_some() || self.z.is_some() || self.e.is_some()
    }
}

/// One parsed line
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub opcode: Option<Opcode>,
    pub params: Params,
    /// Line with the comment stripped, as written
    pub text: String,
    /// Tokens that could not be used
    pub dropped: Vec<String>,
}

/// Parse one line. Returns `None` for blank and comment-only lines.
pub fn parse_line(line: &str) -> Option<Command> {
    let code = match line.find(';') {
        Some(index) => &line[..index],
        None => line,
    }
    .trim();
    if code.is_empty() {
        return None;
    }

    let upper = code.to_ascii_uppercase();
    let mut command = Command {
        opcode: None,
        params: Params::default(),
        text: code.to_string(),
        dropped: Vec::new(),
    };

    let mut last = 0;
    for caps in token_pattern().captures_iter(&upper) {
        let Some(token) = caps.get(0) else { continue };
        let gap = upper[last..token.start()].trim();
        if !gap.is_empty() {
            command.dropped.push(gap.to_string());
        }
        last = token.end();

        let letter = caps[1].chars().next().unwrap_or_default();
        let raw = &caps[2];
        let accepted = match letter {
            'G' | 'M' if command.opcode.is_none() => match raw.parse::<u16>() {
                Ok(number) => {
                    command.opcode = Some(if letter == 'G' {
                        Opcode::G(number)
                    } else {
                        Opcode::M(number)
                    });
                    true
                }
                Err(_) => false,
            },
            _ => match raw.parse::<f64>() {
                Ok(value) if value.is_finite() => command.params.set(letter, value),
                _ => false,
            },
        };
        if !accepted {
            command.dropped.push(token.as_str().to_string());
        }
    }
    let tail = upper[last..].trim();
    if !tail.is_empty() {
        command.dropped.push(tail.to_string());
    }

    Some(command)
}

// ============================================================================
// Instructions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    /// G0 is rapid, G1 is a printing move
    Linear { rapid: bool },
    /// G2 is clockwise, G3 counter-clockwise
    Arc { clockwise: bool },
}

/// Fully resolved motion
#[derive(Debug, Clone, PartialEq)]
pub struct MoveInstruction {
    pub kind: MoveKind,
    /// Commanded end point; `e` is the commanded extruder coordinate
    pub target: Position,
    /// F word, when present and positive
    pub feedrate: Option<f64>,
    /// Filament to draw, never negative
    pub extrude: f64,
}

/// What the orchestrator executes
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Move(MoveInstruction),
    SetTemperature { heater: Heater, target: f64 },
    Dwell { seconds: f64 },
    Home,
    SetMode(PositioningMode),
    SetPosition {
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        e: Option<f64>,
    },
    SetFeedrate(f64),
    /// Passed through untimed
    Unknown { opcode: Option<Opcode> },
}

/// Positioning-mode state for the interpreter
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    mode: PositioningMode,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> PositioningMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PositioningMode) {
        self.mode = mode;
    }

    /// Resolve a command at `position`. Does not change any state.
    pub fn interpret(&self, command: &Command, position: &Position) -> Instruction {
        let params = &command.params;
        let Some(opcode) = command.opcode else {
            return match params.f {
                Some(feedrate) if feedrate > 0.0 && !params.has_axes() => {
                    Instruction::SetFeedrate(feedrate)
                }
                _ => Instruction::Unknown { opcode: None },
            };
        };

        match opcode {
            Opcode::G(0) => self.motion(MoveKind::Linear { rapid: true }, params, position),
            Opcode::G(1) => self.motion(MoveKind::Linear { rapid: false }, params, position),
            Opcode::G(2) => self.motion(MoveKind::Arc { clockwise: true }, params, position),
            Opcode::G(3) => self.motion(MoveKind::Arc { clockwise: false }, params, position),
            Opcode::G(4) => Instruction::Dwell {
                seconds: params.p.filter(|p| *p >= 0.0).unwrap_or(DEFAULT_DWELL),
            },
            Opcode::G(28) => Instruction::Home,
            Opcode::G(90) => Instruction::SetMode(PositioningMode::Absolute),
            Opcode::G(91) => Instruction::SetMode(PositioningMode::Relative),
            Opcode::G(92) => Instruction::SetPosition {
                x: params.x,
                y: params.y,
                z: params.z,
                e: params.e,
            },
            Opcode::M(104) => Instruction::SetTemperature {
                heater: Heater::Hotend,
                target: params.s.unwrap_or(DEFAULT_HOTEND_TARGET),
            },
            Opcode::M(140) => Instruction::SetTemperature {
                heater: Heater::Bed,
                target: params.s.unwrap_or(DEFAULT_BED_TARGET),
            },
            other => Instruction::Unknown {
                opcode: Some(other),
            },
        }
    }

    fn motion(&self, kind: MoveKind, params: &Params, position: &Position) -> Instruction {
        let axis = |value: Option<f64>, current: f64| match (value, self.mode) {
            (Some(v), PositioningMode::Absolute) => v,
            (Some(v), PositioningMode::Relative) => current + v,
            (None, _) => current,
        };

        let (e, extrude) = match params.e {
            Some(v) => {
                let delta = match self.mode {
                    PositioningMode::Absolute => v - position.e,
                    PositioningMode::Relative => v,
                };
                (axis(Some(v), position.e), delta.max(0.0))
            }
            None => (position.e, 0.0),
        };

        Instruction::Move(MoveInstruction {
            kind,
            target: Position::new(
                axis(params.x, position.x),
                axis(params.y, position.y),
                axis(params.z, position.z),
                e,
            ),
            feedrate: params.f.filter(|f| *f > 0.0),
            extrude,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interpret(line: &str) -> Instruction {
        let command = parse_line(line).expect("line has code");
        Interpreter::new().interpret(&command, &Position::ORIGIN)
    }

    #[test]
    fn test_blank_and_comment_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("; just a comment").is_none());
        let command = parse_line("G28 ; home all").unwrap();
        assert_eq!(command.opcode, Some(Opcode::G(28)));
        assert_eq!(command.text, "G28");
    }

    #[test]
    fn test_case_insensitive_and_packed_words() {
        let command = parse_line("g1x10.5y-3 e.25 F1500").unwrap();
        assert_eq!(command.opcode, Some(Opcode::G(1)));
        assert_eq!(command.params.x, Some(10.5));
        assert_eq!(command.params.y, Some(-3.0));
        assert_eq!(command.params.e, Some(0.25));
        assert_eq!(command.params.f, Some(1500.0));
        assert!(command.dropped.is_empty());
        assert_eq!(parse_line("G01 X1").unwrap().opcode, Some(Opcode::G(1)));
    }

    #[test]
    fn test_bad_tokens_are_dropped() {
        let command = parse_line("G1 X1.2.3 Y4 T0 *57 Q").unwrap();
        assert_eq!(command.opcode, Some(Opcode::G(1)));
        assert_eq!(command.params.x, None);
        assert_eq!(command.params.y, Some(4.0));
        assert_eq!(command.dropped, vec!["X1.2.3", "T0", "*57", "Q"]);
    }

    #[test]
    fn test_opcodes() {
        assert_eq!(interpret("G4 P2"), Instruction::Dwell { seconds: 2.0 });
        assert_eq!(interpret("G4"), Instruction::Dwell { seconds: 1.0 });
        assert_eq!(interpret("G28"), Instruction::Home);
        assert_eq!(interpret("G91"), Instruction::SetMode(PositioningMode::Relative));
        assert_eq!(
            interpret("M104 S215"),
            Instruction::SetTemperature {
                heater: Heater::Hotend,
                target: 215.0,
            }
        );
        assert_eq!(
            interpret("M140"),
            Instruction::SetTemperature {
                heater: Heater::Bed,
                target: 60.0,
            }
        );
        assert_eq!(
            interpret("M106 S255"),
            Instruction::Unknown {
                opcode: Some(Opcode::M(106)),
            }
        );
        assert_eq!(interpret("F3000"), Instruction::SetFeedrate(3000.0));
        assert_eq!(interpret("T1"), Instruction::Unknown { opcode: None });
    }

    #[test]
    fn test_absolute_and_relative_targets() {
        let start = Position::new(10.0, 10.0, 1.0, 5.0);
        let command = parse_line("G1 X20 E7").unwrap();

        let mut interpreter = Interpreter::new();
        let Instruction::Move(absolute) = interpreter.interpret(&command, &start) else {
            panic!("expected a move");
        };
        assert_eq!(absolute.target, Position::new(20.0, 10.0, 1.0, 7.0));
        assert_eq!(absolute.extrude, 2.0);

        interpreter.set_mode(PositioningMode::Relative);
        let Instruction::Move(relative) = interpreter.interpret(&command, &start) else {
            panic!("expected a move");
        };
        assert_eq!(relative.target, Position::new(30.0, 10.0, 1.0, 12.0));
        assert_eq!(relative.extrude, 7.0);
    }

    #[test]
    fn test_retraction_draws_nothing() {
        let start = Position::new(0.0, 0.0, 0.0, 5.0);
        let command = parse_line("G1 E3").unwrap();
        let Instruction::Move(motion) = Interpreter::new().interpret(&command, &start) else {
            panic!("expected a move");
        };
        assert_eq!(motion.extrude, 0.0);
        assert_eq!(motion.target.e, 3.0);
    }

    #[test]
    fn test_arcs_and_rapids() {
        let Instruction::Move(arc) = interpret("G2 X5 Y5 I2 J0") else {
            panic!("expected a move");
        };
        assert_eq!(arc.kind, MoveKind::Arc { clockwise: true });
        let Instruction::Move(rapid) = interpret("G0 X5 F0") else {
            panic!("expected a move");
        };
        assert_eq!(rapid.kind, MoveKind::Linear { rapid: true });
        assert_eq!(rapid.feedrate, None);
    }

    #[test]
    fn test_reparsing_is_idempotent() {
        let line = "G1 X12.5 Y-4 E0.8 F1800 ; perimeter";
        let interpreter = Interpreter::new();
        let position = Position::new(1.0, 2.0, 0.2, 0.1);
        let first = parse_line(line).unwrap();
        let second = parse_line(line).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            interpreter.interpret(&first, &position),
            interpreter.interpret(&second, &position)
        );
    }
}
