//! Error types for the simulation core

use std::fmt;
use thiserror::Error;

/// Fatal kernel invariant violations. The run stops; the log stays valid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    #[error("negative or non-finite delay {delay} requested at t={now}")]
    NegativeDelay { delay: f64, now: f64 },

    #[error("event scheduled at t={at} precedes the clock at t={now}")]
    TimeTravel { at: f64, now: f64 },

    #[error("process {pid} released {resource} without holding it")]
    NotHolder { pid: u32, resource: String },

    #[error("{resource} has {holders} holders but capacity {capacity}")]
    CapacityExceeded {
        resource: String,
        holders: usize,
        capacity: usize,
    },

    #[error("container {container} level {level} left [0, {capacity}]")]
    ContainerBounds {
        container: usize,
        level: f64,
        capacity: f64,
    },

    #[error("invalid amount {amount} for container {container}: {reason}")]
    InvalidAmount {
        container: usize,
        amount: f64,
        reason: &'static str,
    },

    #[error("unknown {kind} {index}")]
    UnknownResource { kind: &'static str, index: usize },

    #[error("unknown process {0}")]
    UnknownProcess(u32),

    #[error("process {pid} woke with {wake} while in stage {stage}")]
    UnexpectedWake {
        pid: u32,
        wake: String,
        stage: &'static str,
    },

    #[error("kernel halted by an earlier fault")]
    Halted,
}

impl KernelError {
    pub fn unexpected_wake(pid: u32, wake: &impl fmt::Debug, stage: &'static str) -> Self {
        KernelError::UnexpectedWake {
            pid,
            wake: format!("{wake:?}"),
            stage,
        }
    }
}

/// Rejected configuration, raised before anything is scheduled
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Umbrella error for drivers of the simulation
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

pub type Result<T> = std::result::Result<T, SimError>;
