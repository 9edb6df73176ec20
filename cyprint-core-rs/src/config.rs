//! Simulation configuration
//!
//! All physical constants and background-process periods live here. Every
//! section deserializes with defaults, so a config file only names what it
//! overrides.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for the dispatch-latency RNG
    pub seed: u64,

    pub filament: FilamentConfig,
    pub kinematics: KinematicsConfig,
    pub thermal: ThermalConfig,
    pub sensors: SensorConfig,
    pub timing: TimingConfig,
    pub maintenance: MaintenanceConfig,
    pub power: PowerConfig,
}

/// Filament spool (a Container)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilamentConfig {
    /// Spool capacity (mm of filament)
    pub capacity: f64,
    /// Level at construction
    pub initial_level: f64,
}

/// Motion timing model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicsConfig {
    /// mm/s²
    pub max_acceleration: f64,
    /// mm/min, used until a program sets F
    pub default_feedrate: f64,
}

/// Thermal control loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    /// Loop period (s)
    pub tick: f64,
    /// First-order-lag gain per tick for the hotend
    pub hotend_gain: f64,
    /// First-order-lag gain per tick for the bed
    pub bed_gain: f64,
    /// Starting temperature of both heaters (°C)
    pub ambient: f64,
    /// Hotend counts as heating while more than this far below target (°C)
    pub heating_band: f64,
}

/// Thermistor sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Sampling period (s)
    pub interval: f64,
}

/// Fixed durations used by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub dispatch_latency_min: f64,
    pub dispatch_latency_max: f64,
    pub homing_duration: f64,
    /// Filament watchdog period (s)
    pub watchdog_interval: f64,
}

/// Periodic nozzle cleaning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Time between cycles (s)
    pub interval: f64,
    /// Cleaning duration (s)
    pub duration: f64,
}

/// Power rail events replayed by the power monitor
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub brownouts: Vec<Brownout>,
}

/// Window in which the power monitor seizes the rail
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Brownout {
    pub at: f64,
    pub duration: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            filament: FilamentConfig::default(),
            kinematics: KinematicsConfig::default(),
            thermal: ThermalConfig::default(),
            sensors: SensorConfig::default(),
            timing: TimingConfig::default(),
            maintenance: MaintenanceConfig::default(),
            power: PowerConfig::default(),
        }
    }
}

impl Default for FilamentConfig {
    fn default() -> Self {
        Self {
            capacity: 1000.0,
            initial_level: 1000.0,
        }
    }
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            max_acceleration: 1000.0,
            default_feedrate: 1000.0,
        }
    }
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            tick: 0.1,
            hotend_gain: 0.1,
            bed_gain: 0.05,
            ambient: 25.0,
            heating_band: 1.0,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { interval: 0.1 }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            dispatch_latency_min: 0.001,
            dispatch_latency_max: 0.005,
            homing_duration: 2.0,
            watchdog_interval: 1.0,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: 500.0 * 3600.0,
            duration: 20.0 * 60.0,
        }
    }
}

impl SimConfig {
    /// Load a JSON config file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Config with a different RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject constants the simulation cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("filament.capacity", self.filament.capacity)?;
        let level = self.filament.initial_level;
        if !level.is_finite() || level < 0.0 || level > self.filament.capacity {
            return Err(ConfigError::invalid(
                "filament.initial_level",
                format!("{level} is outside [0, {}]", self.filament.capacity),
            ));
        }

        positive("kinematics.max_acceleration", self.kinematics.max_acceleration)?;
        positive("kinematics.default_feedrate", self.kinematics.default_feedrate)?;

        positive("thermal.tick", self.thermal.tick)?;
        gain("thermal.hotend_gain", self.thermal.hotend_gain)?;
        gain("thermal.bed_gain", self.thermal.bed_gain)?;
        finite("thermal.ambient", self.thermal.ambient)?;
        non_negative("thermal.heating_band", self.thermal.heating_band)?;

        positive("sensors.interval", self.sensors.interval)?;

        non_negative("timing.dispatch_latency_min", self.timing.dispatch_latency_min)?;
        non_negative("timing.dispatch_latency_max", self.timing.dispatch_latency_max)?;
        if self.timing.dispatch_latency_min > self.timing.dispatch_latency_max {
            return Err(ConfigError::invalid(
                "timing.dispatch_latency_min",
                "exceeds timing.dispatch_latency_max",
            ));
        }
        non_negative("timing.homing_duration", self.timing.homing_duration)?;
        positive("timing.watchdog_interval", self.timing.watchdog_interval)?;

        positive("maintenance.interval", self.maintenance.interval)?;
        non_negative("maintenance.duration", self.maintenance.duration)?;

        for brownout in &self.power.brownouts {
            non_negative("power.brownouts.at", brownout.at)?;
            non_negative("power.brownouts.duration", brownout.duration)?;
        }

        Ok(())
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is not finite")))
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} must be positive")))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} must not be negative")))
    }
}

fn gain(field: &'static str, value: f64) -> Result<(), ConfigError> {
    positive(field, value)?;
    if value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} must be in (0, 1]")))
    }
}
