//! # Co-Processing Coordinator
//!
//! Drives one benchmark run end to end:
//!
//! 1. allocate and initialize the buffers,
//! 2. warm the device up with a discarded full-range submission,
//! 3. pass the cross-process start gate, if any,
//! 4. time the selected execution mode from launch to the last join,
//! 5. validate the output against a sequential baseline.
//!
//! In co-processing mode the host pool runs `[0, boundary)` on a background
//! thread while the calling thread submits `[boundary, n)` to the device.
//! The two views come from `Buffers::split`, so each path can only write its
//! own half of `sum` and no locking is involved.

use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::buffers::Buffers;
use crate::config::BenchmarkConfig;
use crate::device::DeviceExecutor;
use crate::error::{CoprocError, Result};
use crate::gate::StartGate;
use crate::host::HostExecutor;
use crate::partition::{ExecutionMode, Partition};
use crate::validate::validate;

/// Timings of one measured run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Device-measured kernel time; 0 when the device path did not run
    pub device_ns: u64,
    /// Monotonic time from launch to the last join
    pub wall_ns: u64,
    /// Mode the run executed in
    pub mode: ExecutionMode,
}

impl ExecutionResult {
    pub fn device_secs(&self) -> f64 {
        self.device_ns as f64 / 1e9
    }

    pub fn wall_secs(&self) -> f64 {
        self.wall_ns as f64 / 1e9
    }
}

/// Everything reported about a completed, validated run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Configuration the run was started with
    pub config: BenchmarkConfig,
    /// Label of the device that ran the accelerator path
    pub device: String,
    /// Resolved split
    pub partition: Partition,
    /// Measured timings
    pub result: ExecutionResult,
    /// Whether the output was checked
    pub validated: bool,
}

impl RunReport {
    pub fn mode(&self) -> ExecutionMode {
        self.result.mode
    }
}

/// Runs the host and device paths for one configuration.
pub struct Coordinator {
    config: BenchmarkConfig,
    host: HostExecutor,
    device: DeviceExecutor,
}

impl Coordinator {
    /// Check the configuration and build the host pool.
    ///
    /// Fails with `Configuration` before any device work happens.
    pub fn new(config: BenchmarkConfig, device: DeviceExecutor) -> Result<Self> {
        config.validate()?;
        let host = HostExecutor::new(config.threads)?;
        tracing::debug!(
            "Coordinator ready: {} host threads, device {}",
            host.threads(),
            device.name()
        );
        Ok(Self {
            config,
            host,
            device,
        })
    }

    /// Allocate, warm up, gate, execute, and validate one run.
    pub fn run(&self, gate: Option<&StartGate>) -> Result<RunReport> {
        let mut buffers = Buffers::with_ramp(self.config.elements)?;
        self.run_with(&mut buffers, gate)
    }

    /// Same as `run`, over caller-provided buffers whose inputs are already
    /// initialized.
    pub fn run_with(&self, buffers: &mut Buffers, gate: Option<&StartGate>) -> Result<RunReport> {
        if buffers.len() != self.config.elements {
            return Err(CoprocError::Configuration(format!(
                "buffers hold {} elements, config expects {}",
                buffers.len(),
                self.config.elements
            )));
        }

        let partition = Partition::compute(self.config.elements, self.config.cpu_share);
        let mode = ExecutionMode::select(&partition);
        tracing::debug!(
            "Partition: boundary {} of {} ({}), host {} device {}",
            partition.boundary(),
            partition.elements(),
            mode,
            partition.host_range(),
            partition.device_range()
        );

        self.warmup(buffers)?;

        if let Some(gate) = gate {
            gate.pass()?;
        }

        let epoch_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or_default();
        tracing::info!("Timer at start: {} us ({})", epoch_us, mode);

        let result = self.execute(buffers, mode)?;

        if self.config.validate {
            let (a, b, expected, actual) = buffers.validation_parts();
            validate(a, b, expected, actual)?;
            tracing::debug!("Validation passed for {} elements", actual.len());
        }

        Ok(RunReport {
            config: self.config.clone(),
            device: self.device.label().to_string(),
            partition,
            result,
            validated: self.config.validate,
        })
    }

    /// Discarded full-range device submission to absorb first-dispatch cost.
    ///
    /// Writes into the validator's scratch buffer, never into `sum`.
    pub fn warmup(&self, buffers: &mut Buffers) -> Result<()> {
        let warmup_start = Instant::now();
        let device_ns = self.device.run(buffers.scratch_lanes())?;
        tracing::debug!(
            "Warmup complete ({:.3} ms wall, {} ns device)",
            warmup_start.elapsed().as_secs_f64() * 1000.0,
            device_ns
        );
        Ok(())
    }

    /// The timed section: launch the paths for `mode` and join them.
    pub fn execute(&self, buffers: &mut Buffers, mode: ExecutionMode) -> Result<ExecutionResult> {
        let elements = buffers.len();

        let (device_ns, wall_ns) = match mode {
            ExecutionMode::AcceleratorOnly => {
                let lanes = buffers.split(0)?.1;
                let start = Instant::now();
                let device_ns = self.device.run(lanes)?;
                (device_ns, start.elapsed())
            }
            ExecutionMode::HostOnly => {
                let lanes = buffers.split(elements)?.0;
                let start = Instant::now();
                self.host.run(lanes);
                (0, start.elapsed())
            }
            ExecutionMode::CoProcessing { boundary } => {
                let (host_lanes, device_lanes) = buffers.split(boundary)?;
                let host = &self.host;
                run_concurrently(
                    move || host.run(host_lanes),
                    || self.device.run(device_lanes),
                )?
            }
        };

        let result = ExecutionResult {
            device_ns,
            wall_ns: wall_ns.as_nanos() as u64,
            mode,
        };
        tracing::info!(
            "Run complete ({}): device {:.6} s, wall {:.6} s",
            mode,
            result.device_secs(),
            result.wall_secs()
        );
        Ok(result)
    }
}

/// Run `host_path` on a background thread while `device_path` runs on the
/// calling thread. Both are joined before any error is returned; a panic on
/// the host side becomes `WorkerPanicked`.
fn run_concurrently<H, D>(host_path: H, device_path: D) -> Result<(u64, Duration)>
where
    H: FnOnce() + Send,
    D: FnOnce() -> Result<u64>,
{
    let start = Instant::now();
    let (host_joined, device_result) = thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("coproc-host-path".to_string())
            .spawn_scoped(scope, host_path)?;
        let device_result = device_path();
        Ok::<_, CoprocError>((worker.join(), device_result))
    })?;
    let wall = start.elapsed();

    host_joined.map_err(|_| CoprocError::WorkerPanicked)?;
    Ok((device_result?, wall))
}
