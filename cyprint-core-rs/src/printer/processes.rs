//! Background processes and the process enum the printer kernel runs

use super::{BusMessage, EcuRole, JobRunner, Printer, SensorSample};
use crate::config::{Brownout, MaintenanceConfig};
use crate::error::KernelError;
use crate::kernel::{Context, Process, Step, Wake};
use crate::log::LogEvent;
use crate::types::{ActuatorId, Component, EcuState};
use tracing::{debug, info};

/// Power rail priority of a brownout (lower number wins)
pub const PRIORITY_BROWNOUT: u8 = 0;
/// Power rail priority of a move
pub const PRIORITY_MOTION: u8 = 1;

pub(crate) type Cx<'a> = Context<'a, Printer, BusMessage>;

/// Every process the printer kernel schedules
pub enum PrinterProcess {
    Job(JobRunner),
    Thermal(ThermalLoop),
    Sensor(SensorLoop),
    Watchdog(FilamentWatchdog),
    Maintenance(MaintenanceCycle),
    Power(PowerMonitor),
    Telemetry(TelemetryListener),
}

impl Process for PrinterProcess {
    type World = Printer;
    type Message = BusMessage;

    fn resume(&mut self, cx: &mut Cx<'_>, wake: Wake<BusMessage>) -> Result<Step, KernelError> {
        match self {
            PrinterProcess::Job(job) => job.resume(cx, wake),
            PrinterProcess::Thermal(thermal) => thermal.resume(cx, wake),
            PrinterProcess::Sensor(sensor) => sensor.resume(cx, wake),
            PrinterProcess::Watchdog(watchdog) => watchdog.resume(cx, wake),
            PrinterProcess::Maintenance(maintenance) => maintenance.resume(cx, wake),
            PrinterProcess::Power(power) => power.resume(cx, wake),
            PrinterProcess::Telemetry(telemetry) => telemetry.resume(cx, wake),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            PrinterProcess::Job(_) => "job",
            PrinterProcess::Thermal(_) => "thermal-loop",
            PrinterProcess::Sensor(sensor) => match sensor.sensor {
                Component::BedThermistor => "bed-sensor",
                _ => "hotend-sensor",
            },
            PrinterProcess::Watchdog(_) => "filament-watchdog",
            PrinterProcess::Maintenance(_) => "maintenance",
            PrinterProcess::Power(_) => "power-monitor",
            PrinterProcess::Telemetry(_) => "telemetry",
        }
    }
}

// ============================================================================
// Thermal control
// ============================================================================

/// Nudges both heaters toward their targets every tick
pub struct ThermalLoop {
    tick: f64,
}

impl ThermalLoop {
    pub fn new(tick: f64) -> Self {
        Self { tick }
    }

    fn resume(&mut self, cx: &mut Cx<'_>, wake: Wake<BusMessage>) -> Result<Step, KernelError> {
        match wake {
            Wake::Start => {}
            Wake::Timeout => {
                let now = cx.now();
                cx.world().thermal_tick(now);
            }
            other => return Err(KernelError::unexpected_wake(cx.pid().0, &other, "thermal")),
        }
        Ok(Step::Timeout(self.tick))
    }
}

// ============================================================================
// Sensors
// ============================================================================

/// Samples one heater and publishes the value on the bus
pub struct SensorLoop {
    sensor: Component,
    source: ActuatorId,
    interval: f64,
}

impl SensorLoop {
    pub fn new(sensor: Component, source: ActuatorId, interval: f64) -> Self {
        Self {
            sensor,
            source,
            interval,
        }
    }

    fn resume(&mut self, cx: &mut Cx<'_>, wake: Wake<BusMessage>) -> Result<Step, KernelError> {
        match wake {
            Wake::Start => {}
            Wake::Timeout => {
                let now = cx.now();
                let printer = cx.world();
                let bus = printer.bus;
                let sample = SensorSample {
                    sensor: self.sensor,
                    value: printer.actuator(self.source).current,
                    time: now,
                };
                cx.send(bus, BusMessage::SensorReading(sample))?;
                cx.world().log_event(
                    now,
                    self.sensor,
                    LogEvent::SensorReading {
                        value: sample.value,
                    },
                );
            }
            other => return Err(KernelError::unexpected_wake(cx.pid().0, &other, "sensor")),
        }
        Ok(Step::Timeout(self.interval))
    }
}

/// Keeps the latest reading per sensor
pub struct TelemetryListener;

impl TelemetryListener {
    fn resume(&mut self, cx: &mut Cx<'_>, wake: Wake<BusMessage>) -> Result<Step, KernelError> {
        match wake {
            Wake::Start => {}
            Wake::Received(BusMessage::SensorReading(sample)) => {
                cx.world().record_reading(sample);
            }
            other => {
                return Err(KernelError::unexpected_wake(cx.pid().0, &other, "telemetry"))
            }
        }
        let bus = cx.world().bus;
        Ok(Step::Receive(bus))
    }
}

// ============================================================================
// Filament watchdog
// ============================================================================

/// Checks the spool every interval and raises a single runout fault
pub struct FilamentWatchdog {
    interval: f64,
}

impl FilamentWatchdog {
    pub fn new(interval: f64) -> Self {
        Self { interval }
    }

    fn resume(&mut self, cx: &mut Cx<'_>, wake: Wake<BusMessage>) -> Result<Step, KernelError> {
        match wake {
            Wake::Start => Ok(Step::Timeout(self.interval)),
            Wake::Timeout => {
                let filament = cx.world().filament;
                if cx.level(filament)? > 0.0 {
                    return Ok(Step::Timeout(self.interval));
                }
                let now = cx.now();
                cx.world().filament_runout(now);
                Ok(Step::Exit)
            }
            other => Err(KernelError::unexpected_wake(cx.pid().0, &other, "watchdog")),
        }
    }
}

// ============================================================================
// Maintenance
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaintenanceStage {
    Waiting,
    AwaitJobLock,
    Cleaning,
}

/// Periodic cleaning that takes the job lock so it never overlaps a print
pub struct MaintenanceCycle {
    interval: f64,
    duration: f64,
    stage: MaintenanceStage,
}

impl MaintenanceCycle {
    pub fn new(config: &MaintenanceConfig) -> Self {
        Self {
            interval: config.interval,
            duration: config.duration,
            stage: MaintenanceStage::Waiting,
        }
    }

    fn resume(&mut self, cx: &mut Cx<'_>, wake: Wake<BusMessage>) -> Result<Step, KernelError> {
        let now = cx.now();
        let job_lock = cx.world().job_lock;
        match (self.stage, wake) {
            (MaintenanceStage::Waiting, Wake::Start) => Ok(Step::Timeout(self.interval)),
            (MaintenanceStage::Waiting, Wake::Timeout) => {
                debug!("Printer: maintenance due at {}, waiting for the job lock", now);
                self.stage = MaintenanceStage::AwaitJobLock;
                Ok(Step::Acquire(job_lock))
            }
            (MaintenanceStage::AwaitJobLock, Wake::Granted(_)) => {
                info!("Printer: maintenance started at {}", now);
                let printer = cx.world();
                printer.log_event(
                    now,
                    Component::Maintenance,
                    LogEvent::MaintenanceStart {
                        msg: "Scheduled cleaning/maintenance".to_string(),
                    },
                );
                printer.set_ecu(EcuRole::Main, EcuState::Maintenance, now);
                self.stage = MaintenanceStage::Cleaning;
                Ok(Step::Timeout(self.duration))
            }
            (MaintenanceStage::Cleaning, Wake::Timeout) => {
                let printer = cx.world();
                printer.log_event(
                    now,
                    Component::Maintenance,
                    LogEvent::MaintenanceEnd {
                        msg: "Maintenance complete".to_string(),
                    },
                );
                printer.set_ecu(EcuRole::Main, EcuState::Idle, now);
                cx.release(job_lock)?;
                self.stage = MaintenanceStage::Waiting;
                Ok(Step::Timeout(self.interval))
            }
            (stage, other) => Err(KernelError::unexpected_wake(
                cx.pid().0,
                &other,
                match stage {
                    MaintenanceStage::Waiting => "maintenance/waiting",
                    MaintenanceStage::AwaitJobLock => "maintenance/await-job-lock",
                    MaintenanceStage::Cleaning => "maintenance/cleaning",
                },
            )),
        }
    }
}

// ============================================================================
// Power monitor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerStage {
    Waiting,
    AwaitRail,
    Holding,
}

/// Replays scheduled brownouts by seizing the power rail
pub struct PowerMonitor {
    brownouts: Vec<Brownout>,
    next: usize,
    stage: PowerStage,
}

impl PowerMonitor {
    pub fn new(brownouts: &[Brownout]) -> Self {
        let mut brownouts = brownouts.to_vec();
        brownouts.sort_by(|a, b| a.at.total_cmp(&b.at));
        Self {
            brownouts,
            next: 0,
            stage: PowerStage::Waiting,
        }
    }

    /// Sleep until the next brownout, or exit when none are left
    fn wait_for_next(&mut self, cx: &Cx<'_>) -> Step {
        self.stage = PowerStage::Waiting;
        match self.brownouts.get(self.next) {
            Some(brownout) => Step::Timeout((brownout.at - cx.now().as_secs()).max(0.0)),
            None => Step::Exit,
        }
    }

    fn resume(&mut self, cx: &mut Cx<'_>, wake: Wake<BusMessage>) -> Result<Step, KernelError> {
        let now = cx.now();
        let rail = cx.world().power_rail;
        match (self.stage, wake) {
            (PowerStage::Waiting, Wake::Start) => Ok(self.wait_for_next(cx)),
            (PowerStage::Waiting, Wake::Timeout) => {
                self.stage = PowerStage::AwaitRail;
                Ok(Step::AcquirePreemptive {
                    resource: rail,
                    priority: PRIORITY_BROWNOUT,
                })
            }
            (PowerStage::AwaitRail, Wake::Granted(_)) => {
                let duration = self.brownouts.get(self.next).map_or(0.0, |b| b.duration);
                info!("Printer: brownout for {:.3}s at {}", duration, now);
                cx.world().log_event(
                    now,
                    Component::PowerMonitor,
                    LogEvent::BrownoutStart { duration },
                );
                self.stage = PowerStage::Holding;
                Ok(Step::Timeout(duration))
            }
            (PowerStage::Holding, Wake::Timeout) => {
                cx.release(rail)?;
                cx.world()
                    .log_event(now, Component::PowerMonitor, LogEvent::BrownoutEnd {});
                self.next += 1;
                Ok(self.wait_for_next(cx))
            }
            (stage, other) => Err(KernelError::unexpected_wake(
                cx.pid().0,
                &other,
                match stage {
                    PowerStage::Waiting => "power/waiting",
                    PowerStage::AwaitRail => "power/await-rail",
                    PowerStage::Holding => "power/holding",
                },
            )),
        }
    }
}
