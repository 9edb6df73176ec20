//! Typed point-in-time view of the printer

use crate::ecu::Actuator;
use crate::kernel::Kernel;
use crate::printer::{EcuRole, JobRecord, Printer, PrinterProcess, SensorSample};
use crate::types::{Component, EcuState, Position, PositioningMode, SimTime};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EcuSnapshot {
    pub component: Component,
    pub state: EcuState,
    /// Someone holds the ECU's lock
    pub busy: bool,
    /// Processes waiting for the lock
    pub queued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilamentSnapshot {
    pub level: f64,
    pub capacity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrinterSnapshot {
    pub time: SimTime,
    pub ecus: Vec<EcuSnapshot>,
    pub actuators: Vec<Actuator>,
    pub filament: FilamentSnapshot,
    pub position: Position,
    pub positioning: PositioningMode,
    /// mm/min
    pub feedrate: f64,
    pub readings: Vec<SensorSample>,
    pub jobs: Vec<JobRecord>,
    pub pending_events: usize,
}

impl PrinterSnapshot {
    pub fn capture(kernel: &Kernel<PrinterProcess>, printer: &Printer) -> Self {
        let ecus = [EcuRole::Main, EcuRole::Motion, EcuRole::Thermal]
            .into_iter()
            .map(|role| {
                let ecu = printer.ecu(role);
                let lock = kernel.mutex(ecu.resource());
                EcuSnapshot {
                    component: ecu.component(),
                    state: ecu.state(),
                    busy: lock.is_some_and(|lock| !lock.holders().is_empty()),
                    queued: lock.map_or(0, |lock| lock.queued()),
                }
            })
            .collect();

        let (level, capacity) = kernel
            .container(printer.filament)
            .map_or((0.0, 0.0), |tank| (tank.level(), tank.capacity()));

        Self {
            time: kernel.now(),
            ecus,
            actuators: vec![
                printer.print_head.clone(),
                printer.heated_bed.clone(),
                printer.steppers.clone(),
            ],
            filament: FilamentSnapshot { level, capacity },
            position: printer.position(),
            positioning: printer.interpreter.mode(),
            feedrate: printer.planner.feedrate(),
            readings: printer.readings.values().copied().collect(),
            jobs: printer.jobs.clone(),
            pending_events: kernel.pending_events(),
        }
    }

    pub fn ecu(&self, component: Component) -> Option<&EcuSnapshot> {
        self.ecus.iter().find(|ecu| ecu.component == component)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
