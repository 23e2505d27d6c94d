//! # Workload Partitioning
//!
//! Splits `[0, n)` into a host-handled prefix `[0, boundary)` and a
//! device-handled suffix `[boundary, n)`, then picks one of three execution
//! modes from the boundary.
//!
//! ```text
//!   0                 boundary                        n
//!   |---- host pool ----|---------- accelerator -------|
//! ```
//!
//! The boundary is `floor((n - 1) * r)`, not `floor(n * r)`. The `n - 1` term
//! keeps `boundary < n - 1` for every `r < 0.99`, so an interior split never
//! leaves the device with an empty range. It shifts the split by at most one
//! element relative to the naive formula. Shares of 0.99 and above are
//! treated as host-only.

use serde::Serialize;
use std::fmt;

use crate::error::{CoprocError, Result};

/// cpu share at or above which the device path is skipped entirely.
pub const HOST_ONLY_THRESHOLD: f64 = 0.99;

/// A contiguous range of indices checked against a buffer length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubRange {
    start: usize,
    len: usize,
}

impl SubRange {
    /// Create a range of `len` elements at `start`, rejecting anything that
    /// does not fit inside `bound`.
    pub fn new(start: usize, len: usize, bound: usize) -> Result<Self> {
        match start.checked_add(len) {
            Some(end) if end <= bound => Ok(Self { start, len }),
            _ => Err(CoprocError::Configuration(format!(
                "range [{}, {}+{}) exceeds buffer length {}",
                start, start, len, bound
            ))),
        }
    }

    /// `[0, len)`.
    pub fn full(len: usize) -> Self {
        Self { start: 0, len }
    }

    /// Range covering `[start, end)` inside `bound`.
    pub fn between(start: usize, end: usize, bound: usize) -> Result<Self> {
        if end < start {
            return Err(CoprocError::Configuration(format!(
                "range end {} before start {}",
                end, start
            )));
        }
        Self::new(start, end - start, bound)
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the two ranges share any index.
    pub fn overlaps(&self, other: &SubRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end() && other.start < self.end()
    }
}

impl fmt::Display for SubRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}

/// The split of `[0, elements)` between host and device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Partition {
    elements: usize,
    boundary: usize,
}

impl Partition {
    /// Compute the boundary for `elements` items and cpu share `cpu_share`.
    pub fn compute(elements: usize, cpu_share: f64) -> Self {
        let boundary = if cpu_share >= HOST_ONLY_THRESHOLD {
            elements
        } else {
            // float-to-int casts saturate, so a negative share lands on 0
            (elements.saturating_sub(1) as f64 * cpu_share).floor() as usize
        };
        Self {
            elements,
            boundary: boundary.min(elements),
        }
    }

    /// Total element count.
    pub fn elements(&self) -> usize {
        self.elements
    }

    /// First device-handled index, always `<= elements`.
    pub fn boundary(&self) -> usize {
        self.boundary
    }

    /// Host prefix `[0, boundary)`.
    pub fn host_range(&self) -> SubRange {
        SubRange {
            start: 0,
            len: self.boundary,
        }
    }

    /// Device suffix `[boundary, elements)`.
    pub fn device_range(&self) -> SubRange {
        SubRange {
            start: self.boundary,
            len: self.elements - self.boundary,
        }
    }
}

/// The three terminal execution modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Device computes `[0, n)`
    AcceleratorOnly,
    /// Host pool computes `[0, boundary)`, device computes `[boundary, n)`
    CoProcessing { boundary: usize },
    /// Host pool computes `[0, n)`
    HostOnly,
}

impl ExecutionMode {
    /// Pick the mode for a partition.
    ///
    /// | boundary              | mode             |
    /// |-----------------------|------------------|
    /// | `0`                   | accelerator-only |
    /// | `1 ..= n - 2`         | co-processing    |
    /// | `>= n - 1`            | host-only        |
    pub fn select(partition: &Partition) -> Self {
        let boundary = partition.boundary;
        if boundary == 0 {
            ExecutionMode::AcceleratorOnly
        } else if boundary + 1 >= partition.elements {
            ExecutionMode::HostOnly
        } else {
            ExecutionMode::CoProcessing { boundary }
        }
    }

    /// Label used in logs and result rows.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionMode::AcceleratorOnly => "accelerator-only",
            ExecutionMode::CoProcessing { .. } => "co-processing",
            ExecutionMode::HostOnly => "host-only",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
