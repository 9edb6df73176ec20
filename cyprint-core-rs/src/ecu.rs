//! Controller units and actuators

use crate::kernel::MutexId;
use crate::log::{EventLog, LogEvent};
use crate::types::{ActuatorId, Component, EcuState, Position, SimTime};
use serde::Serialize;

/// Virtual controller serializing one category of command
#[derive(Debug, Clone)]
pub struct Ecu {
    component: Component,
    state: EcuState,
    /// Lock held while the ECU executes a command
    resource: MutexId,
}

impl Ecu {
    pub fn new(component: Component, resource: MutexId) -> Self {
        Self {
            component,
            state: EcuState::Idle,
            resource,
        }
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn state(&self) -> EcuState {
        self.state
    }

    pub fn resource(&self) -> MutexId {
        self.resource
    }

    /// Move to `state`, logging the transition. No transition table is
    /// enforced. Returns false (and logs nothing) when already there.
    pub fn set_state(&mut self, state: EcuState, now: SimTime, log: &mut EventLog) -> bool {
        if state == self.state {
            return false;
        }
        log.record(
            now,
            self.component,
            LogEvent::StateChange {
                from: self.state,
                to: state,
            },
        );
        self.state = state;
        true
    }
}

/// Physical element driven by the ECUs
#[derive(Debug, Clone, Serialize)]
pub struct Actuator {
    pub name: ActuatorId,
    /// Measured value (°C for heaters)
    pub current: f64,
    pub target: f64,
    pub position: Position,
}

impl Actuator {
    pub fn heater(name: ActuatorId, ambient: f64) -> Self {
        Self {
            name,
            current: ambient,
            target: ambient,
            position: Position::ORIGIN,
        }
    }

    pub fn motion(name: ActuatorId) -> Self {
        Self {
            name,
            current: 0.0,
            target: 0.0,
            position: Position::ORIGIN,
        }
    }

    /// First-order lag step toward the target
    pub fn approach_target(&mut self, gain: f64) {
        self.current += (self.target - self.current) * gain;
    }
}
