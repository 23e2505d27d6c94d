//! # Benchmark Configuration
//!
//! `BenchmarkConfig` is built once at process start and never mutated
//! afterwards. Components receive it by reference; the coordinator derives
//! its own reporting copy instead of writing back into it.
//!
//! Sizes follow the KiB/MiB convention of the benchmark scripts: 1 KiB of
//! 32-bit integers is 256 elements.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CoprocError, Result};

/// Elements in 1 KiB of `i32` data.
pub const ELEMENTS_PER_KIB: usize = 256;

/// Default host worker count.
pub const DEFAULT_THREADS: usize = 8;

/// Default CSV sink.
pub const DEFAULT_OUTPUT: &str = "add_gpu.csv";

/// Default name of the shared memory handshake segment.
pub const DEFAULT_GATE_NAME: &str = "/coproc_gate";

/// Which device the accelerator path is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Data-parallel kernel on a host worker pool
    Cpu,
    /// CUDA device
    Gpu,
}

impl DeviceKind {
    /// Label used in result rows.
    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Gpu => "gpu",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(DeviceKind::Cpu),
            "gpu" => Ok(DeviceKind::Gpu),
            other => Err(format!("Unknown device '{}', expected cpu or gpu", other)),
        }
    }
}

/// Side of the cross-process handshake this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateRole {
    /// Writes the ready flag and proceeds
    Producer,
    /// Polls the ready flag before starting
    Consumer,
}

impl fmt::Display for GateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRole::Producer => f.write_str("producer"),
            GateRole::Consumer => f.write_str("consumer"),
        }
    }
}

impl FromStr for GateRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "producer" | "write" => Ok(GateRole::Producer),
            "consumer" | "read" => Ok(GateRole::Consumer),
            other => Err(format!(
                "Unknown gate role '{}', expected producer or consumer",
                other
            )),
        }
    }
}

/// Cross-process start handshake settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Shared memory segment name
    pub name: String,
    /// Producer or consumer
    pub role: GateRole,
    /// Consumer deadline; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Sleep between consumer polls
    pub poll_interval: Duration,
}

impl GateConfig {
    /// Create a gate config with a 60 s consumer deadline.
    pub fn new(role: GateRole) -> Self {
        Self {
            name: DEFAULT_GATE_NAME.to_string(),
            role,
            timeout: Some(Duration::from_secs(60)),
            poll_interval: Duration::from_micros(10),
        }
    }

    /// Set the segment name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the consumer deadline
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Immutable description of one benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Number of vector elements
    pub elements: usize,
    /// Host worker pool size
    pub threads: usize,
    /// Fraction of the vector computed by the host pool, in `[0, 1]`
    pub cpu_share: f64,
    /// Accelerator path target
    pub device: DeviceKind,
    /// Device ordinal (GPU only)
    pub device_id: usize,
    /// Compare against a sequential baseline after the run
    pub validate: bool,
    /// CSV sink
    pub output: PathBuf,
    /// Optional JSON summary path
    pub summary: Option<PathBuf>,
    /// Cross-process start handshake
    pub gate: Option<GateConfig>,
}

impl BenchmarkConfig {
    /// Create a config for `elements` with the benchmark defaults.
    pub fn new(elements: usize) -> Self {
        Self {
            elements,
            threads: DEFAULT_THREADS,
            cpu_share: 1.0,
            device: DeviceKind::Cpu,
            device_id: 0,
            validate: true,
            output: PathBuf::from(DEFAULT_OUTPUT),
            summary: None,
            gate: None,
        }
    }

    /// Set the host worker count
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the cpu share ratio
    pub fn with_cpu_share(mut self, cpu_share: f64) -> Self {
        self.cpu_share = cpu_share;
        self
    }

    /// Set the device kind and ordinal
    pub fn with_device(mut self, device: DeviceKind, device_id: usize) -> Self {
        self.device = device;
        self.device_id = device_id;
        self
    }

    /// Enable or disable validation
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Set the CSV sink
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    /// Set the JSON summary path
    pub fn with_summary(mut self, summary: Option<PathBuf>) -> Self {
        self.summary = summary;
        self
    }

    /// Enable the cross-process handshake
    pub fn with_gate(mut self, gate: Option<GateConfig>) -> Self {
        self.gate = gate;
        self
    }

    /// Check every field that would otherwise fail mid-run.
    ///
    /// Runs before any device interaction.
    pub fn validate(&self) -> Result<()> {
        if self.elements == 0 {
            return Err(CoprocError::Configuration(
                "element count must be positive".to_string(),
            ));
        }
        if self.threads == 0 {
            return Err(CoprocError::Configuration(
                "host thread count must be positive".to_string(),
            ));
        }
        if !self.cpu_share.is_finite() || !(0.0..=1.0).contains(&self.cpu_share) {
            return Err(CoprocError::Configuration(format!(
                "cpu share {} outside [0, 1]",
                self.cpu_share
            )));
        }
        if let Some(gate) = &self.gate {
            let stem = gate.name.strip_prefix('/').unwrap_or(&gate.name);
            if stem.is_empty() || stem.contains('/') {
                return Err(CoprocError::Configuration(format!(
                    "gate name '{}' must look like /name",
                    gate.name
                )));
            }
        }
        Ok(())
    }
}

/// Element count for the `--kib` / `--mib` size flags.
///
/// Both multipliers apply when both are given, and a zero multiplier counts
/// as one. Without either flag the vector is 1 KiB.
pub fn elements_for_size(kib: Option<usize>, mib: Option<usize>) -> Result<usize> {
    let mut elements = ELEMENTS_PER_KIB;
    if let Some(kib) = kib {
        elements = elements
            .checked_mul(kib.max(1))
            .ok_or_else(|| CoprocError::Configuration(format!("{} KiB overflows", kib)))?;
    }
    if let Some(mib) = mib {
        elements = mib
            .max(1)
            .checked_mul(1024)
            .and_then(|factor| elements.checked_mul(factor))
            .ok_or_else(|| CoprocError::Configuration(format!("{} MiB overflows", mib)))?;
    }
    Ok(elements)
}
