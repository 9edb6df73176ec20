//! Event log
//!
//! Append-only record of everything observable the printer does. Entries
//! serialize to `{"time", "component", "event_type", "details"}`; the
//! component and event names only become strings at that boundary.

use crate::types::{Component, EcuState, JobId, Position, PositioningMode, SimTime};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use tracing::trace;

/// Category of a recovered fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Watchdog found the spool empty
    FilamentRunout,
    /// A move asked for more filament than was left
    ExtrusionCapped,
    /// A move lost the power rail mid-flight
    MovePreempted,
    /// A move whose target or timing overflowed; skipped
    MoveRejected,
}

/// Event payloads, tagged by their wire name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "details")]
pub enum LogEvent {
    #[serde(rename = "STATE_CHANGE")]
    StateChange { from: EcuState, to: EcuState },

    #[serde(rename = "cmd_sent")]
    MoveCompleted {
        command: String,
        move_time: f64,
        distance: f64,
        from: Position,
        to: Position,
    },

    #[serde(rename = "SET_TARGET")]
    SetTarget {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hotend_target: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bed_target: Option<f64>,
    },

    #[serde(rename = "DWELL")]
    Dwell { command: String, duration: f64 },

    #[serde(rename = "MODE_CHANGE")]
    ModeChange { mode: PositioningMode },

    #[serde(rename = "HOMING")]
    Homing { command: String },

    #[serde(rename = "SET_POSITION")]
    SetPosition { position: Position },

    #[serde(rename = "TEMP_UPDATE")]
    TempUpdate { hotend: f64, bed: f64 },

    #[serde(rename = "SENSOR_READING")]
    SensorReading { value: f64 },

    #[serde(rename = "FAULT")]
    Fault {
        kind: FaultKind,
        msg: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requested: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consumed: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },

    #[serde(rename = "START")]
    MaintenanceStart { msg: String },

    #[serde(rename = "END")]
    MaintenanceEnd { msg: String },

    #[serde(rename = "BROWNOUT_START")]
    BrownoutStart { duration: f64 },

    #[serde(rename = "BROWNOUT_END")]
    BrownoutEnd {},

    #[serde(rename = "JOB_START")]
    JobStart { job: JobId, lines: usize },

    #[serde(rename = "JOB_END")]
    JobEnd { job: JobId, instructions: usize },
}

impl LogEvent {
    /// Fault with only a message
    pub fn fault(kind: FaultKind, msg: impl Into<String>) -> Self {
        LogEvent::Fault {
            kind,
            msg: msg.into(),
            requested: None,
            consumed: None,
            command: None,
        }
    }

    /// Wire name of the event
    pub fn event_type(&self) -> &'static str {
        match self {
            LogEvent::StateChange { .. } => "STATE_CHANGE",
            LogEvent::MoveCompleted { .. } => "cmd_sent",
            LogEvent::SetTarget { .. } => "SET_TARGET",
            LogEvent::Dwell { .. } => "DWELL",
            LogEvent::ModeChange { .. } => "MODE_CHANGE",
            LogEvent::Homing { .. } => "HOMING",
            LogEvent::SetPosition { .. } => "SET_POSITION",
            LogEvent::TempUpdate { .. } => "TEMP_UPDATE",
            LogEvent::SensorReading { .. } => "SENSOR_READING",
            LogEvent::Fault { .. } => "FAULT",
            LogEvent::MaintenanceStart { .. } => "START",
            LogEvent::MaintenanceEnd { .. } => "END",
            LogEvent::BrownoutStart { .. } => "BROWNOUT_START",
            LogEvent::BrownoutEnd {} => "BROWNOUT_END",
            LogEvent::JobStart { .. } => "JOB_START",
            LogEvent::JobEnd { .. } => "JOB_END",
        }
    }
}

/// One log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: SimTime,
    pub component: Component,
    #[serde(flatten)]
    pub event: LogEvent,
}

impl LogEntry {
    /// Serialize as a single JSON line (without the newline)
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}

/// Ordered, append-only log with an incremental read cursor
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Vec<LogEntry>,
    drained: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, time: SimTime, component: Component, event: LogEvent) {
        debug_assert!(
            self.entries.last().map_or(true, |last| last.time <= time),
            "log time went backwards"
        );
        trace!("Log: {} {} {}", time, component, event.event_type());
        self.entries.push(LogEntry {
            time,
            component,
            event,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries appended since the previous call
    pub fn drain_new(&mut self) -> Vec<LogEntry> {
        let fresh = self.entries[self.drained..].to_vec();
        self.drained = self.entries.len();
        fresh
    }

    /// Entries not yet returned by `drain_new`
    pub fn pending(&self) -> usize {
        self.entries.len() - self.drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Write every entry as JSON lines
    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for entry in &self.entries {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}
