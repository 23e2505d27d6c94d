#![deny(missing_docs)]
//! # Vector-Add Benchmark Process
//!
//! The `vecadd` binary runs one co-processing vector add. The cpu share
//! decides how much of the vector the host pool computes; the rest goes to
//! the selected device (`cpu` for the host-parallel device, `gpu` for CUDA).
//!
//! ## Paired Runs
//!
//! Two `vecadd` processes can be lined up with `--gate-role`:
//! - **`producer`**: raises the shared ready flag right before its timed run.
//! - **`consumer`**: waits for the flag (bounded by `--gate-timeout-ms`)
//!   before starting its timed run.
//!
//! Both finish warm-up before touching the gate, so the timed sections start
//! as close together as the poll interval allows. A successful run appends
//! one row to the CSV sink; a failed run writes nothing and exits non-zero.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use coproc::config::{elements_for_size, DEFAULT_GATE_NAME, DEFAULT_OUTPUT};
use coproc::report::write_outputs;
use coproc::{
    BenchmarkConfig, Coordinator, DeviceExecutor, DeviceKind, GateConfig, GateRole,
    HandshakeGate, StartGate,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Vector-add co-processing benchmark")]
/// Command-line arguments for a benchmark run.
struct Args {
    /// Vector size in KiB of 32-bit integers
    #[arg(long)]
    kib: Option<usize>,

    /// Vector size in MiB of 32-bit integers
    #[arg(long)]
    mib: Option<usize>,

    /// Host worker threads
    #[arg(long, alias = "omp", default_value = "8")]
    threads: usize,

    /// Accelerator path device (cpu or gpu)
    #[arg(long, default_value = "cpu")]
    device: DeviceKind,

    /// GPU device ID
    #[arg(long, default_value = "0")]
    gpu_id: usize,

    /// Fraction of the vector computed by the host pool
    #[arg(long, default_value = "1.0")]
    cpu_share: f64,

    /// CSV result sink
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    out: PathBuf,

    /// Skip result validation
    #[arg(long, alias = "nv")]
    no_validate: bool,

    /// Write a JSON summary of the run
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Take part in a paired run (producer or consumer)
    #[arg(long)]
    gate_role: Option<GateRole>,

    /// Shared memory name of the start gate
    #[arg(long, default_value = DEFAULT_GATE_NAME)]
    gate_name: String,

    /// Consumer wait limit in milliseconds (0 waits indefinitely)
    #[arg(long, default_value = "60000")]
    gate_timeout_ms: u64,

    /// Consumer poll interval in microseconds
    #[arg(long, default_value = "10")]
    gate_poll_us: u64,

    /// Remove the gate segment after the run
    #[arg(long)]
    cleanup_gate: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn gate_config(&self) -> Option<GateConfig> {
        let timeout = match self.gate_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        self.gate_role.map(|role| {
            GateConfig::new(role)
                .with_name(self.gate_name.clone())
                .with_timeout(timeout)
                .with_poll_interval(Duration::from_micros(self.gate_poll_us))
        })
    }

    fn benchmark_config(&self) -> Result<BenchmarkConfig> {
        let elements = elements_for_size(self.kib, self.mib)?;
        let config = BenchmarkConfig::new(elements)
            .with_threads(self.threads)
            .with_cpu_share(self.cpu_share)
            .with_device(self.device, self.gpu_id)
            .with_validation(!self.no_validate)
            .with_output(self.out.clone())
            .with_summary(self.summary.clone())
            .with_gate(self.gate_config());
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = run(&args);

    if args.cleanup_gate {
        match HandshakeGate::remove(&args.gate_name) {
            Ok(true) => info!("[VECADD:DONE] Removed gate {}", args.gate_name),
            Ok(false) => {}
            Err(e) => error!("[VECADD:DONE] Failed to remove gate: {}", e),
        }
    }

    if let Err(ref e) = result {
        error!("[VECADD:ERROR] {:#}", e);
    }
    result
}

fn run(args: &Args) -> Result<()> {
    let config = args.benchmark_config().context("Invalid configuration")?;

    info!("[VECADD:INIT] Starting vector add benchmark");
    info!(
        "[VECADD:INIT] Elements: {}, threads: {}, cpu share: {}",
        config.elements, config.threads, config.cpu_share
    );
    info!(
        "[VECADD:INIT] Device: {} (id {}), validation: {}",
        config.device, config.device_id, config.validate
    );

    let gate = match &config.gate {
        Some(gate_config) => {
            let gate = StartGate::open(gate_config).context("Failed to open start gate")?;
            info!("[VECADD:INIT] Gate {} as {}", gate.name(), gate.role());
            Some(gate)
        }
        None => None,
    };

    let device = DeviceExecutor::open(config.device, config.device_id)
        .context("Failed to open device")?;
    let coordinator = Coordinator::new(config, device)?;

    let report = coordinator.run(gate.as_ref()).context("Benchmark run failed")?;

    info!(
        "[VECADD:DONE] {} run: boundary {} of {}",
        report.mode(),
        report.partition.boundary(),
        report.partition.elements()
    );
    info!(
        "[VECADD:DONE] Device time: {:.6} s, wall time: {:.6} s",
        report.result.device_secs(),
        report.result.wall_secs()
    );
    if report.validated {
        info!("[VECADD:DONE] Validation passed");
    }

    write_outputs(&report).context("Failed to write results")?;
    info!(
        "[VECADD:DONE] Appended result to {}",
        report.config.output.display()
    );
    if let Some(ref path) = report.config.summary {
        info!("[VECADD:DONE] Saved summary to {}", path.display());
    }

    Ok(())
}
