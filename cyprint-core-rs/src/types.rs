//! Shared types for the printer simulation

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;

/// Virtual time in seconds.
///
/// Ordered with `f64::total_cmp`; every value handed to the kernel is
/// checked to be finite first, so the order is the numeric one.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(f64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0.0);

    pub fn from_secs(secs: f64) -> Self {
        SimTime(secs)
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    pub fn is_finite(self) -> bool {
        self.0.is_finite()
    }
}

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Add<f64> for SimTime {
    type Output = SimTime;

    fn add(self, delay: f64) -> SimTime {
        SimTime(self.0 + delay)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}s", self.0)
    }
}

/// Every named participant that can appear in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Component {
    #[serde(rename = "Main_ECU")]
    MainEcu,
    #[serde(rename = "Motion_ECU")]
    MotionEcu,
    #[serde(rename = "Thermal_ECU")]
    ThermalEcu,
    #[serde(rename = "Hotend_Thermistor")]
    HotendThermistor,
    #[serde(rename = "Bed_Thermistor")]
    BedThermistor,
    #[serde(rename = "Filament_Sensor")]
    FilamentSensor,
    #[serde(rename = "Filament")]
    Filament,
    #[serde(rename = "Maintenance")]
    Maintenance,
    #[serde(rename = "Power_Monitor")]
    PowerMonitor,
    #[serde(rename = "Job_Runner")]
    JobRunner,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::MainEcu => "Main_ECU",
            Component::MotionEcu => "Motion_ECU",
            Component::ThermalEcu => "Thermal_ECU",
            Component::HotendThermistor => "Hotend_Thermistor",
            Component::BedThermistor => "Bed_Thermistor",
            Component::FilamentSensor => "Filament_Sensor",
            Component::Filament => "Filament",
            Component::Maintenance => "Maintenance",
            Component::PowerMonitor => "Power_Monitor",
            Component::JobRunner => "Job_Runner",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ECU state label. Any state may follow any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EcuState {
    #[default]
    Idle,
    Processing,
    Moving,
    Heating,
    Error,
    Maintenance,
}

impl fmt::Display for EcuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcuState::Idle => write!(f, "IDLE"),
            EcuState::Processing => write!(f, "PROCESSING"),
            EcuState::Moving => write!(f, "MOVING"),
            EcuState::Heating => write!(f, "HEATING"),
            EcuState::Error => write!(f, "ERROR"),
            EcuState::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

/// Toolhead position plus extruder coordinate (mm)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "Z")]
    pub z: f64,
    #[serde(rename = "E")]
    pub e: f64,
}

impl Position {
    pub const ORIGIN: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        e: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64, e: f64) -> Self {
        Self { x, y, z, e }
    }

    pub fn xyz(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.z, self.e].iter().all(|axis| axis.is_finite())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{:.3} Y{:.3} Z{:.3} E{:.3}", self.x, self.y, self.z, self.e)
    }
}

/// Absolute (G90) or relative (G91) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositioningMode {
    #[default]
    #[serde(rename = "Absolute positioning")]
    Absolute,
    #[serde(rename = "Relative positioning")]
    Relative,
}

impl fmt::Display for PositioningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositioningMode::Absolute => write!(f, "Absolute positioning"),
            PositioningMode::Relative => write!(f, "Relative positioning"),
        }
    }
}

/// Heated element addressed by M104/M140
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Heater {
    Hotend,
    Bed,
}

/// Physical actuators owned by the printer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActuatorId {
    #[serde(rename = "Print_Head")]
    PrintHead,
    #[serde(rename = "Heated_Bed")]
    HeatedBed,
    #[serde(rename = "Steppers")]
    Steppers,
}

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorId::PrintHead => write!(f, "Print_Head"),
            ActuatorId::HeatedBed => write!(f, "Heated_Bed"),
            ActuatorId::Steppers => write!(f, "Steppers"),
        }
    }
}

/// Identifier handed out by `Simulation::submit_job`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}
