//! Job runner: executes one submitted program line by line

use super::processes::{Cx, PRIORITY_MOTION};
use super::{BusMessage, EcuRole};
use crate::error::KernelError;
use crate::gcode::{parse_line, Command, Instruction, MoveInstruction};
use crate::kernel::{Interruption, Step, Wake};
use crate::log::LogEvent;
use crate::planner::MovePlan;
use crate::types::{Component, EcuState, JobId, Position};
use tracing::debug;

/// A move between dispatch and completion
#[derive(Debug, Clone)]
struct PendingMove {
    command: String,
    from: Position,
    to: Position,
    plan: MovePlan,
    /// Filament requested
    extrude: f64,
    /// Filament actually drawn
    consumed: f64,
}

#[derive(Debug)]
enum Stage {
    Created,
    AwaitJobLock,
    AwaitMainEcu(Command),
    Dispatching(Command),
    AwaitMotionEcu(PendingMove),
    AwaitPower(PendingMove),
    Moving(PendingMove),
    Extruding(PendingMove),
    Dwelling { command: String, seconds: f64 },
    Homing,
    Done,
}

impl Stage {
    fn label(&self) -> &'static str {
        match self {
            Stage::Created => "created",
            Stage::AwaitJobLock => "await-job-lock",
            Stage::AwaitMainEcu(_) => "await-main-ecu",
            Stage::Dispatching(_) => "dispatching",
            Stage::AwaitMotionEcu(_) => "await-motion-ecu",
            Stage::AwaitPower(_) => "await-power",
            Stage::Moving(_) => "moving",
            Stage::Extruding(_) => "extruding",
            Stage::Dwelling { .. } => "dwelling",
            Stage::Homing => "homing",
            Stage::Done => "done",
        }
    }
}

/// Holds the job lock for its whole program and runs each instruction
/// through the main ECU, and moves additionally through the motion ECU and
/// the power rail.
pub struct JobRunner {
    id: JobId,
    lines: Vec<String>,
    /// Next line to read
    cursor: usize,
    executed: usize,
    stage: Stage,
}

impl JobRunner {
    pub fn new(id: JobId, lines: Vec<String>) -> Self {
        Self {
            id,
            lines,
            cursor: 0,
            executed: 0,
            stage: Stage::Created,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn resume(
        &mut self,
        cx: &mut Cx<'_>,
        wake: Wake<BusMessage>,
    ) -> Result<Step, KernelError> {
        let label = self.stage.label();
        let stage = std::mem::replace(&mut self.stage, Stage::Done);
        let now = cx.now();

        match (stage, wake) {
            (Stage::Created, Wake::Start) => {
                self.stage = Stage::AwaitJobLock;
                Ok(Step::Acquire(cx.world().job_lock))
            }
            (Stage::AwaitJobLock, Wake::Granted(_)) => {
                cx.world().job_started(self.id, self.lines.len(), now);
                self.next_instruction(cx)
            }
            (Stage::AwaitMainEcu(command), Wake::Granted(_)) => {
                let printer = cx.world();
                printer.set_ecu(EcuRole::Main, EcuState::Processing, now);
                let latency = printer.dispatch_latency();
                self.stage = Stage::Dispatching(command);
                Ok(Step::Timeout(latency))
            }
            (Stage::Dispatching(command), Wake::Timeout) => self.dispatch(cx, command),
            (Stage::AwaitMotionEcu(pending), Wake::Granted(_)) => {
                let printer = cx.world();
                printer.set_ecu(EcuRole::Motion, EcuState::Moving, now);
                let resource = printer.power_rail;
                self.stage = Stage::AwaitPower(pending);
                Ok(Step::AcquirePreemptive {
                    resource,
                    priority: PRIORITY_MOTION,
                })
            }
            (Stage::AwaitPower(pending), Wake::Granted(_)) => {
                // Back from an interruption the ECU is in ERROR
                cx.world().set_ecu(EcuRole::Motion, EcuState::Moving, now);
                let move_time = pending.plan.move_time;
                self.stage = Stage::Moving(pending);
                Ok(Step::Timeout(move_time))
            }
            (Stage::Moving(pending), Wake::Interrupted(interruption)) => {
                self.retry_move(cx, pending, interruption)
            }
            (Stage::Moving(pending), Wake::Timeout) => self.complete_move(cx, pending),
            (Stage::Extruding(mut pending), Wake::Got { amount, .. }) => {
                pending.consumed = amount;
                self.finish_move(cx, pending)
            }
            (Stage::Dwelling { command, seconds }, Wake::Timeout) => {
                cx.world().log_event(
                    now,
                    Component::MainEcu,
                    LogEvent::Dwell {
                        command,
                        duration: seconds,
                    },
                );
                self.finish_instruction(cx)
            }
            (Stage::Homing, Wake::Timeout) => self.finish_instruction(cx),
            (_, wake) => Err(KernelError::unexpected_wake(cx.pid().0, &wake, label)),
        }
    }

    /// Queue up for the main ECU with the next executable line, or finish
    fn next_instruction(&mut self, cx: &mut Cx<'_>) -> Result<Step, KernelError> {
        while let Some(line) = self.lines.get(self.cursor) {
            self.cursor += 1;
            if let Some(command) = parse_line(line) {
                if !command.dropped.is_empty() {
                    debug!(
                        "Printer: {} line {} dropped {:?}",
                        self.id, self.cursor, command.dropped
                    );
                }
                let printer = cx.world();
                printer.job_progress(self.id, self.cursor);
                let resource = printer.main_ecu.resource();
                self.stage = Stage::AwaitMainEcu(command);
                return Ok(Step::Acquire(resource));
            }
        }

        let now = cx.now();
        let printer = cx.world();
        printer.job_finished(self.id, self.executed, now);
        let job_lock = printer.job_lock;
        cx.release(job_lock)?;
        self.stage = Stage::Done;
        Ok(Step::Exit)
    }

    fn dispatch(&mut self, cx: &mut Cx<'_>, command: Command) -> Result<Step, KernelError> {
        let now = cx.now();
        let printer = cx.world();
        let position = printer.position();
        let instruction = printer.interpreter.interpret(&command, &position);

        match instruction {
            Instruction::Move(MoveInstruction {
                target,
                feedrate,
                extrude,
                ..
            }) => {
                let plan = printer.planner.plan(position.xyz(), target.xyz(), feedrate);
                if !target.is_finite() || !extrude.is_finite() || !plan.is_finite() {
                    printer.move_rejected(&command.text, now);
                    return self.finish_instruction(cx);
                }
                let resource = printer.motion_ecu.resource();
                self.stage = Stage::AwaitMotionEcu(PendingMove {
                    command: command.text,
                    from: position,
                    to: target,
                    plan,
                    extrude,
                    consumed: 0.0,
                });
                Ok(Step::Acquire(resource))
            }
            Instruction::SetTemperature { heater, target } => {
                printer.set_target(heater, target, now);
                self.finish_instruction(cx)
            }
            Instruction::Dwell { seconds } => {
                self.stage = Stage::Dwelling {
                    command: command.text,
                    seconds,
                };
                Ok(Step::Timeout(seconds))
            }
            Instruction::Home => {
                printer.home(&command.text, now);
                self.stage = Stage::Homing;
                Ok(Step::Timeout(printer.config.timing.homing_duration))
            }
            Instruction::SetMode(mode) => {
                printer.set_mode(mode, now);
                self.finish_instruction(cx)
            }
            Instruction::SetPosition { x, y, z, e } => {
                printer.set_position([x, y, z, e], now);
                self.finish_instruction(cx)
            }
            Instruction::SetFeedrate(feedrate) => {
                printer.planner.set_feedrate(feedrate);
                self.finish_instruction(cx)
            }
            Instruction::Unknown { opcode } => {
                debug!(
                    "Printer: {} passing through '{}' ({:?})",
                    self.id, command.text, opcode
                );
                self.finish_instruction(cx)
            }
        }
    }

    /// Lost the power rail: nothing moved, start over once it comes back
    fn retry_move(
        &mut self,
        cx: &mut Cx<'_>,
        pending: PendingMove,
        interruption: Interruption,
    ) -> Result<Step, KernelError> {
        let now = cx.now();
        let printer = cx.world();
        printer.move_preempted(&pending.command, interruption, now);
        let resource = printer.power_rail;
        self.stage = Stage::AwaitPower(pending);
        Ok(Step::AcquirePreemptive {
            resource,
            priority: PRIORITY_MOTION,
        })
    }

    /// Travel done: hand back the rail and draw the filament
    fn complete_move(
        &mut self,
        cx: &mut Cx<'_>,
        mut pending: PendingMove,
    ) -> Result<Step, KernelError> {
        if let Some(interruption) = cx.take_interruption() {
            return self.retry_move(cx, pending, interruption);
        }
        let power_rail = cx.world().power_rail;
        if cx.holds(power_rail) {
            cx.release(power_rail)?;
        }
        if pending.extrude <= 0.0 {
            return self.finish_move(cx, pending);
        }

        let now = cx.now();
        let filament = cx.world().filament;
        let available = cx.level(filament)?;
        let amount = pending.extrude.min(available);
        if amount < pending.extrude {
            cx.world().extrusion_capped(pending.extrude, amount, now);
        }
        if amount <= 0.0 {
            pending.consumed = 0.0;
            return self.finish_move(cx, pending);
        }

        self.stage = Stage::Extruding(pending);
        Ok(Step::Get {
            container: filament,
            amount,
        })
    }

    fn finish_move(&mut self, cx: &mut Cx<'_>, pending: PendingMove) -> Result<Step, KernelError> {
        let now = cx.now();
        let mut to = pending.to;
        if pending.consumed < pending.extrude {
            to.e = pending.from.e + pending.consumed;
        }

        let printer = cx.world();
        printer.steppers.position = to;
        printer.set_ecu(EcuRole::Motion, EcuState::Idle, now);
        printer.log_event(
            now,
            Component::MotionEcu,
            LogEvent::MoveCompleted {
                command: pending.command,
                move_time: pending.plan.move_time,
                distance: pending.plan.distance,
                from: pending.from,
                to,
            },
        );
        let resource = printer.motion_ecu.resource();
        cx.release(resource)?;
        self.finish_instruction(cx)
    }

    /// Back to IDLE and hand the main ECU on, whatever the instruction was
    fn finish_instruction(&mut self, cx: &mut Cx<'_>) -> Result<Step, KernelError> {
        let now = cx.now();
        let printer = cx.world();
        printer.set_ecu(EcuRole::Main, EcuState::Idle, now);
        let resource = printer.main_ecu.resource();
        self.executed += 1;
        cx.release(resource)?;
        self.next_instruction(cx)
    }
}
