//! CyPrint - command-line driver
//!
//! Runs G-code through the simulated printer, streaming the event log to a
//! JSON-lines file while virtual time advances in steps.

use clap::{Args, Parser, Subcommand};
use cyprint_core::{analyze_program, demo_program, LogEntry, SimConfig, Simulation};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Cyber-physical 3D-printer simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug-level diagnostics (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a program through the simulated printer
    Run(RunArgs),

    /// Time a program with the planner, without simulating it
    Analyze {
        /// G-code file
        #[arg(short, long)]
        gcode: PathBuf,

        /// JSON config (only the kinematics section is used)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the spiral demo program
    Demo {
        #[arg(short, long, default_value = "500")]
        movements: usize,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// G-code file to print
    #[arg(short, long, conflicts_with = "demo")]
    gcode: Option<PathBuf>,

    /// Print the demo program with this many moves (default when no file is given)
    #[arg(long)]
    demo: Option<usize>,

    /// Stop at this virtual time (s)
    #[arg(long, default_value = "3600")]
    horizon: f64,

    /// Virtual time advanced per log flush (s)
    #[arg(long, default_value = "10")]
    step: f64,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the config seed
    #[arg(long)]
    seed: Option<u64>,

    /// Write the event log here as JSON lines
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Print the final printer snapshot as JSON
    #[arg(long)]
    snapshot: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Analyze { gcode, config } => {
            let config = load_config(config.as_deref())?;
            let lines = read_program(&gcode)?;
            let summary = analyze_program(&lines, &config.kinematics);
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Demo { movements } => {
            for line in demo_program(movements) {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SimConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading config from {}", path.display());
            Ok(SimConfig::from_json_file(path)?)
        }
        None => Ok(SimConfig::default()),
    }
}

fn read_program(path: &Path) -> std::io::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text.lines().map(str::to_string).collect())
}

/// Write log batches as JSON lines until the channel closes
async fn write_log(
    path: PathBuf,
    mut batches: mpsc::Receiver<Vec<LogEntry>>,
) -> std::io::Result<usize> {
    let file = tokio::fs::File::create(&path).await?;
    let mut writer = BufWriter::new(file);
    let mut written = 0;
    while let Some(batch) = batches.recv().await {
        for entry in &batch {
            let mut line = serde_json::to_vec(entry)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
        }
        written += batch.len();
    }
    writer.flush().await?;
    debug!("Wrote {} log entries to {}", written, path.display());
    Ok(written)
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if args.step.is_nan() || args.step <= 0.0 {
        return Err(format!("--step must be positive, got {}", args.step).into());
    }
    if !args.horizon.is_finite() || args.horizon < 0.0 {
        return Err(format!("--horizon must be a finite time, got {}", args.horizon).into());
    }

    let program = match &args.gcode {
        Some(path) => read_program(path)?,
        None => demo_program(args.demo.unwrap_or(500)),
    };

    let mut sim = Simulation::new(config)?;
    let job = sim.submit_job(program.iter().map(String::as_str))?;
    info!("Running {} ({} lines) until t={}s", job, program.len(), args.horizon);

    let (tx, writer) = match args.log.clone() {
        Some(path) => {
            let (tx, rx) = mpsc::channel(64);
            (Some(tx), Some(tokio::spawn(write_log(path, rx))))
        }
        None => (None, None),
    };

    let mut counts = BTreeMap::new();
    let driven = drive(&mut sim, args.horizon, args.step, tx.as_ref(), &mut counts).await;

    drop(tx);
    if let Some(writer) = writer {
        let written = writer.await??;
        info!("Event log: {} entries", written);
    }

    println!("Simulated time: {}", sim.now());
    println!("Log entries:    {}", sim.log().len());
    for (event_type, count) in &counts {
        println!("  {event_type:<16} {count}");
    }
    if args.snapshot {
        println!("{}", sim.snapshot_state().to_json_pretty()?);
    }
    driven
}

/// Advance in steps, streaming each drained batch. When a step fails, the
/// entries logged up to the failure are still sent before the error returns.
async fn drive(
    sim: &mut Simulation,
    horizon: f64,
    step: f64,
    tx: Option<&mpsc::Sender<Vec<LogEntry>>>,
    counts: &mut BTreeMap<&'static str, usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let target = (sim.now().as_secs() + step).min(horizon);
        let result = sim.run_until(target);
        let batch = sim.drain_log();
        for entry in &batch {
            *counts.entry(entry.event_type()).or_default() += 1;
        }
        if let Some(tx) = tx {
            tx.send(batch).await?;
        }
        let outcome = result?;
        debug!("Advanced to t={:.3}s ({:?})", target, outcome);

        if sim.jobs_completed() {
            info!("Jobs completed at t={}", sim.now());
            return Ok(());
        }
        if target >= horizon {
            warn!("Horizon reached before the jobs completed");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_step_still_flushes_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(write_log(path.clone(), rx));

        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        sim.submit_job(["G4 P0.2"]).unwrap();
        sim.run_until(1.0).unwrap();
        let expected = sim.log().len();
        assert!(expected > 0);

        // A horizon behind the clock makes the first step fail
        let mut counts = BTreeMap::new();
        let driven = drive(&mut sim, 0.5, 0.1, Some(&tx), &mut counts).await;
        assert!(driven.is_err());
        drop(tx);

        assert_eq!(writer.await.unwrap().unwrap(), expected);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), expected);
        for line in text.lines() {
            serde_json::from_str::<LogEntry>(line).unwrap();
        }
        assert_eq!(counts.get("DWELL"), Some(&1));
    }

    #[tokio::test]
    async fn test_drive_stops_when_jobs_complete() {
        let mut sim = Simulation::new(SimConfig::default()).unwrap();
        sim.submit_job(["G28", "G1 X10 F6000"]).unwrap();
        let mut counts = BTreeMap::new();
        drive(&mut sim, 100.0, 1.0, None, &mut counts).await.unwrap();
        assert!(sim.jobs_completed());
        assert!(sim.now().as_secs() < 100.0);
        assert_eq!(counts.get("cmd_sent"), Some(&1));
    }
}
