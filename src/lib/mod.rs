//! # Vector-Add Co-Processing Benchmark
//!
//! This crate measures how an accelerator and a host worker pool perform
//! when they split one data-parallel job. A vector add `sum = a + b` is cut
//! at a boundary derived from the cpu share: the host pool computes the
//! prefix, the device computes the suffix, and both run concurrently. Two
//! independent benchmark processes can line their timed sections up through
//! a shared memory start gate to measure contention.
//!
//! ## Core Modules
//!
//! - `partition`: boundary computation and execution mode selection.
//! - `buffers`: run buffers and the disjoint views handed to each path.
//! - `host`: the fixed-size host worker pool.
//! - `device`: the `Accelerator` trait and the host-parallel device.
//! - `cuda`: CUDA device with event timing (feature `cuda`).
//! - `coordinator`: warm-up, gate, timed run, and validation.
//! - `validate`: sequential baseline comparison.
//! - `gate`: cross-process start handshake over POSIX shared memory.
//! - `report`: CSV rows and JSON summaries.

pub mod buffers;
pub mod config;
pub mod coordinator;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod device;
pub mod error;
pub mod gate;
pub mod host;
pub mod partition;
pub mod report;
pub mod validate;

pub use config::{BenchmarkConfig, DeviceKind, GateConfig, GateRole};
pub use coordinator::{Coordinator, ExecutionResult, RunReport};
pub use device::{Accelerator, DeviceExecutor, HostParallelDevice, KernelEvent};
pub use error::{CoprocError, Result};
pub use gate::{GateError, HandshakeGate, StartGate};
pub use host::HostExecutor;
pub use partition::{ExecutionMode, Partition, SubRange};
pub use report::ResultRecord;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
