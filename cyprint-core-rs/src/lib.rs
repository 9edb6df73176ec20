//! Cyber-physical 3D-printer simulation core
//!
//! A discrete-event kernel with capacity-limited resources drives a model of
//! a printer controller: three ECUs, heaters and steppers, a G-code
//! interpreter and kinematic planner, and a handful of background processes
//! (thermal control, sensors, filament watchdog, maintenance, brownouts).
//! Everything observable is recorded in an append-only event log.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Simulation                            │
//! │   submit_job ─► Kernel<PrinterProcess> ◄── run_until         │
//! │                   │  event queue (time, seq)                 │
//! │                   │  mutexes · power rail · filament · bus   │
//! │                   ▼                                          │
//! │                Printer (world) ──► EventLog ──► drain_log    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use cyprint_core::{SimConfig, Simulation};
//!
//! let mut sim = Simulation::new(SimConfig::default()).unwrap();
//! sim.submit_job(["G28", "G1 X10 Y10 F3000", "G4 P0.5"]).unwrap();
//! sim.run_until(10.0).unwrap();
//!
//! assert!(sim.jobs_completed());
//! let entries = sim.drain_log();
//! assert!(entries.iter().any(|entry| entry.event_type() == "cmd_sent"));
//! ```

pub mod config;
pub mod ecu;
pub mod error;
pub mod gcode;
pub mod kernel;
pub mod log;
pub mod planner;
pub mod printer;
pub mod program;
pub mod simulation;
pub mod snapshot;
pub mod types;

pub use config::SimConfig;
pub use error::{ConfigError, KernelError, SimError};
pub use kernel::RunOutcome;
pub use log::{EventLog, FaultKind, LogEntry, LogEvent};
pub use program::{analyze_program, demo_program, ProgramSummary};
pub use simulation::Simulation;
pub use snapshot::PrinterSnapshot;
pub use types::{Component, EcuState, JobId, Position, PositioningMode, SimTime};
