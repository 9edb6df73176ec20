//! Simulation handle: the public entry point for drivers

use crate::config::SimConfig;
use crate::error::{KernelError, Result};
use crate::kernel::{Kernel, RunOutcome};
use crate::log::{EventLog, LogEntry};
use crate::printer::{JobRunner, JobStatus, Printer, PrinterProcess};
use crate::snapshot::PrinterSnapshot;
use crate::types::{JobId, SimTime};
use tracing::info;

/// One printer and the kernel that drives it
pub struct Simulation {
    kernel: Kernel<PrinterProcess>,
    printer: Printer,
    next_job: u64,
}

impl Simulation {
    /// Validate `config`, build the printer and start its background
    /// processes. Nothing runs until [`Simulation::run_until`].
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let mut kernel = Kernel::new();
        let printer = Printer::new(config, &mut kernel)?;
        printer.start(&mut kernel)?;
        info!("Printer: simulation created (seed {})", printer.config().seed);
        Ok(Self {
            kernel,
            printer,
            next_job: 1,
        })
    }

    /// Queue a program. Jobs run one at a time in submission order.
    pub fn submit_job<I, S>(&mut self, lines: I) -> std::result::Result<JobId, KernelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = JobId(self.next_job);
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        let count = lines.len();
        self.kernel
            .spawn(PrinterProcess::Job(JobRunner::new(id, lines)))?;
        self.printer.register_job(id, count);
        self.next_job += 1;
        info!("Printer: submitted {} with {} lines", id, count);
        Ok(id)
    }

    /// Advance virtual time to `horizon` seconds
    pub fn run_until(&mut self, horizon: f64) -> std::result::Result<RunOutcome, KernelError> {
        self.kernel
            .run_until(&mut self.printer, SimTime::from_secs(horizon))
    }

    pub fn now(&self) -> SimTime {
        self.kernel.now()
    }

    pub fn snapshot_state(&self) -> PrinterSnapshot {
        PrinterSnapshot::capture(&self.kernel, &self.printer)
    }

    /// Log entries appended since the previous call
    pub fn drain_log(&mut self) -> Vec<LogEntry> {
        self.printer.log.drain_new()
    }

    /// The whole log so far
    pub fn log(&self) -> &EventLog {
        self.printer.log()
    }

    pub fn printer(&self) -> &Printer {
        &self.printer
    }

    pub fn kernel(&self) -> &Kernel<PrinterProcess> {
        &self.kernel
    }

    pub fn is_halted(&self) -> bool {
        self.kernel.is_halted()
    }

    /// True once every submitted job has finished
    pub fn jobs_completed(&self) -> bool {
        self.printer
            .jobs
            .iter()
            .all(|job| matches!(job.status, JobStatus::Completed { .. }))
    }
}
