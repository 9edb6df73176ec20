//! Printer orchestration
//!
//! [`Printer`] is the world every printer process runs against: it owns the
//! ECUs, actuators, interpreter and planner state, the event log, and the
//! ids of the kernel resources the processes contend for.

mod job;
mod processes;

pub use job::JobRunner;
pub use processes::{
    FilamentWatchdog, MaintenanceCycle, PowerMonitor, PrinterProcess, SensorLoop,
    TelemetryListener, ThermalLoop, PRIORITY_BROWNOUT, PRIORITY_MOTION,
};

use crate::config::SimConfig;
use crate::ecu::{Actuator, Ecu};
use crate::error::{ConfigError, KernelError};
use crate::gcode::Interpreter;
use crate::kernel::{ContainerId, Interruption, Kernel, MutexId, PreemptiveId, StoreId};
use crate::log::{EventLog, FaultKind, LogEvent};
use crate::planner::KinematicPlanner;
use crate::types::{
    ActuatorId, Component, EcuState, Heater, JobId, Position, PositioningMode, SimTime,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Which ECU an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcuRole {
    Main,
    Motion,
    Thermal,
}

/// A thermistor sample as published on the bus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub sensor: Component,
    pub value: f64,
    pub time: SimTime,
}

/// Messages carried by the CAN bus store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    SensorReading(SensorSample),
}

/// Progress of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running { line: usize },
    Completed { at: SimTime, instructions: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub lines: usize,
    #[serde(flatten)]
    pub status: JobStatus,
}

/// State shared by all printer processes
pub struct Printer {
    pub(crate) config: SimConfig,
    pub(crate) main_ecu: Ecu,
    pub(crate) motion_ecu: Ecu,
    pub(crate) thermal_ecu: Ecu,
    pub(crate) print_head: Actuator,
    pub(crate) heated_bed: Actuator,
    pub(crate) steppers: Actuator,
    pub(crate) interpreter: Interpreter,
    pub(crate) planner: KinematicPlanner,
    pub(crate) job_lock: MutexId,
    pub(crate) power_rail: PreemptiveId,
    pub(crate) filament: ContainerId,
    pub(crate) bus: StoreId,
    pub(crate) log: EventLog,
    pub(crate) readings: BTreeMap<Component, SensorSample>,
    pub(crate) jobs: Vec<JobRecord>,
    rng: ChaCha8Rng,
}

impl Printer {
    /// Create the printer's resources in `kernel`. Background processes are
    /// started separately by [`Printer::start`].
    pub fn new(
        config: SimConfig,
        kernel: &mut Kernel<PrinterProcess>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let main_ecu = Ecu::new(Component::MainEcu, kernel.add_mutex("Main_ECU", 1)?);
        let motion_ecu = Ecu::new(Component::MotionEcu, kernel.add_mutex("Motion_ECU", 1)?);
        let thermal_ecu = Ecu::new(Component::ThermalEcu, kernel.add_mutex("Thermal_ECU", 1)?);
        let job_lock = kernel.add_mutex("job", 1)?;
        let power_rail = kernel.add_preemptive("power_rail", 1)?;
        let filament = kernel.add_container(
            "filament",
            config.filament.capacity,
            config.filament.initial_level,
        )?;
        let bus = kernel.add_store("can_bus");

        let ambient = config.thermal.ambient;
        Ok(Self {
            main_ecu,
            motion_ecu,
            thermal_ecu,
            print_head: Actuator::heater(ActuatorId::PrintHead, ambient),
            heated_bed: Actuator::heater(ActuatorId::HeatedBed, ambient),
            steppers: Actuator::motion(ActuatorId::Steppers),
            interpreter: Interpreter::new(),
            planner: KinematicPlanner::new(&config.kinematics),
            job_lock,
            power_rail,
            filament,
            bus,
            log: EventLog::new(),
            readings: BTreeMap::new(),
            jobs: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
        })
    }

    /// Spawn the background processes, in the order their same-instant
    /// wake-ups are delivered
    pub fn start(&self, kernel: &mut Kernel<PrinterProcess>) -> Result<(), KernelError> {
        let interval = self.config.sensors.interval;
        kernel.spawn(PrinterProcess::Sensor(SensorLoop::new(
            Component::HotendThermistor,
            ActuatorId::PrintHead,
            interval,
        )))?;
        kernel.spawn(PrinterProcess::Sensor(SensorLoop::new(
            Component::BedThermistor,
            ActuatorId::HeatedBed,
            interval,
        )))?;
        kernel.spawn(PrinterProcess::Watchdog(FilamentWatchdog::new(
            self.config.timing.watchdog_interval,
        )))?;
        kernel.spawn(PrinterProcess::Maintenance(MaintenanceCycle::new(
            &self.config.maintenance,
        )))?;
        kernel.spawn(PrinterProcess::Thermal(ThermalLoop::new(
            self.config.thermal.tick,
        )))?;
        kernel.spawn(PrinterProcess::Telemetry(TelemetryListener))?;
        if !self.config.power.brownouts.is_empty() {
            kernel.spawn(PrinterProcess::Power(PowerMonitor::new(
                &self.config.power.brownouts,
            )))?;
        }
        Ok(())
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn ecu(&self, role: EcuRole) -> &Ecu {
        match role {
            EcuRole::Main => &self.main_ecu,
            EcuRole::Motion => &self.motion_ecu,
            EcuRole::Thermal => &self.thermal_ecu,
        }
    }

    pub fn actuator(&self, id: ActuatorId) -> &Actuator {
        match id {
            ActuatorId::PrintHead => &self.print_head,
            ActuatorId::HeatedBed => &self.heated_bed,
            ActuatorId::Steppers => &self.steppers,
        }
    }

    pub fn position(&self) -> Position {
        self.steppers.position
    }

    pub(crate) fn log_event(&mut self, now: SimTime, component: Component, event: LogEvent) {
        self.log.record(now, component, event);
    }

    pub(crate) fn set_ecu(&mut self, role: EcuRole, state: EcuState, now: SimTime) -> bool {
        let ecu = match role {
            EcuRole::Main => &mut self.main_ecu,
            EcuRole::Motion => &mut self.motion_ecu,
            EcuRole::Thermal => &mut self.thermal_ecu,
        };
        ecu.set_state(state, now, &mut self.log)
    }

    pub(crate) fn dispatch_latency(&mut self) -> f64 {
        let timing = &self.config.timing;
        self.rng
            .gen_range(timing.dispatch_latency_min..=timing.dispatch_latency_max)
    }

    /// One thermal-control tick
    pub(crate) fn thermal_tick(&mut self, now: SimTime) {
        let thermal = &self.config.thermal;
        let heating = self.print_head.current < self.print_head.target - thermal.heating_band;
        let (hotend_gain, bed_gain) = (thermal.hotend_gain, thermal.bed_gain);

        let state = if heating {
            EcuState::Heating
        } else {
            EcuState::Idle
        };
        self.set_ecu(EcuRole::Thermal, state, now);
        self.print_head.approach_target(hotend_gain);
        self.heated_bed.approach_target(bed_gain);
        self.log.record(
            now,
            Component::ThermalEcu,
            LogEvent::TempUpdate {
                hotend: self.print_head.current,
                bed: self.heated_bed.current,
            },
        );
    }

    pub(crate) fn set_target(&mut self, heater: Heater, target: f64, now: SimTime) {
        let event = match heater {
            Heater::Hotend => {
                self.print_head.target = target;
                LogEvent::SetTarget {
                    hotend_target: Some(target),
                    bed_target: None,
                }
            }
            Heater::Bed => {
                self.heated_bed.target = target;
                LogEvent::SetTarget {
                    hotend_target: None,
                    bed_target: Some(target),
                }
            }
        };
        self.log.record(now, Component::ThermalEcu, event);
    }

    pub(crate) fn home(&mut self, command: &str, now: SimTime) {
        self.steppers.position = Position::ORIGIN;
        self.log.record(
            now,
            Component::MotionEcu,
            LogEvent::Homing {
                command: command.to_string(),
            },
        );
    }

    pub(crate) fn set_mode(&mut self, mode: PositioningMode, now: SimTime) {
        self.interpreter.set_mode(mode);
        self.log
            .record(now, Component::MotionEcu, LogEvent::ModeChange { mode });
    }

    pub(crate) fn set_position(&mut self, axes: [Option<f64>; 4], now: SimTime) {
        let position = &mut self.steppers.position;
        for (value, slot) in axes.into_iter().zip([
            &mut position.x,
            &mut position.y,
            &mut position.z,
            &mut position.e,
        ]) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        let position = *position;
        self.log
            .record(now, Component::MotionEcu, LogEvent::SetPosition { position });
    }

    /// Watchdog found the spool empty
    pub(crate) fn filament_runout(&mut self, now: SimTime) {
        warn!("Printer: filament runout at {}", now);
        self.set_ecu(EcuRole::Main, EcuState::Error, now);
        self.log.record(
            now,
            Component::FilamentSensor,
            LogEvent::fault(FaultKind::FilamentRunout, "Filament runout"),
        );
    }

    /// A move drew less filament than it asked for
    pub(crate) fn extrusion_capped(&mut self, requested: f64, consumed: f64, now: SimTime) {
        warn!(
            "Printer: extrusion capped at {:.3} of {:.3} at {}",
            consumed, requested, now
        );
        self.set_ecu(EcuRole::Main, EcuState::Error, now);
        self.log.record(
            now,
            Component::Filament,
            LogEvent::Fault {
                kind: FaultKind::ExtrusionCapped,
                msg: "Filament runout".to_string(),
                requested: Some(requested),
                consumed: Some(consumed),
                command: None,
            },
        );
    }

    /// A move lost the power rail and will be retried
    pub(crate) fn move_preempted(
        &mut self,
        command: &str,
        interruption: Interruption,
        now: SimTime,
    ) {
        warn!(
            "Printer: '{}' preempted by {} at {}",
            command, interruption.by, now
        );
        self.set_ecu(EcuRole::Motion, EcuState::Error, now);
        self.log.record(
            now,
            Component::MotionEcu,
            LogEvent::Fault {
                kind: FaultKind::MovePreempted,
                msg: "Power rail preempted; move will be retried".to_string(),
                requested: None,
                consumed: None,
                command: Some(command.to_string()),
            },
        );
    }

    /// A move that cannot be timed is skipped
    pub(crate) fn move_rejected(&mut self, command: &str, now: SimTime) {
        warn!("Printer: rejecting '{}' at {}", command, now);
        self.set_ecu(EcuRole::Main, EcuState::Error, now);
        self.log.record(
            now,
            Component::MotionEcu,
            LogEvent::Fault {
                kind: FaultKind::MoveRejected,
                msg: "Move out of range; skipped".to_string(),
                requested: None,
                consumed: None,
                command: Some(command.to_string()),
            },
        );
    }

    pub(crate) fn record_reading(&mut self, sample: SensorSample) {
        self.readings.insert(sample.sensor, sample);
    }

    pub(crate) fn register_job(&mut self, id: JobId, lines: usize) {
        self.jobs.push(JobRecord {
            id,
            lines,
            status: JobStatus::Queued,
        });
    }

    fn job_mut(&mut self, id: JobId) -> Option<&mut JobRecord> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    pub(crate) fn job_started(&mut self, id: JobId, lines: usize, now: SimTime) {
        info!("Printer: {} started with {} lines at {}", id, lines, now);
        if let Some(job) = self.job_mut(id) {
            job.status = JobStatus::Running { line: 0 };
        }
        self.log
            .record(now, Component::JobRunner, LogEvent::JobStart { job: id, lines });
    }

    pub(crate) fn job_progress(&mut self, id: JobId, line: usize) {
        if let Some(job) = self.job_mut(id) {
            job.status = JobStatus::Running { line };
        }
    }

    pub(crate) fn job_finished(&mut self, id: JobId, instructions: usize, now: SimTime) {
        info!(
            "Printer: {} finished {} instructions at {}",
            id, instructions, now
        );
        if let Some(job) = self.job_mut(id) {
            job.status = JobStatus::Completed {
                at: now,
                instructions,
            };
        }
        self.log.record(
            now,
            Component::JobRunner,
            LogEvent::JobEnd {
                job: id,
                instructions,
            },
        );
    }
}
