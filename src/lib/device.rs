//! # Device Executor
//!
//! The accelerator path of a run. Devices sit behind the `Accelerator` trait:
//! one kernel submission per call, covering the whole borrowed range, with
//! the device's own start/end timestamps returned in a `KernelEvent`.
//!
//! Submission may be asynchronous inside a device, but `vector_add` only
//! returns once the device has confirmed completion. The output slice is
//! mutably borrowed for the duration of the call, so nothing can read `sum`
//! before the device is done with it.
//!
//! Available devices:
//! - `HostParallelDevice` (`cpu`): data-parallel kernel on its own worker pool.
//! - `CudaAccelerator` (`gpu`, feature `cuda`): NVRTC kernel timed with CUDA events.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::time::Instant;

use crate::buffers::Lanes;
use crate::config::DeviceKind;
use crate::error::{CoprocError, Result};
use crate::host::add_into;

/// Device-side timestamps of one completed kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KernelEvent {
    /// Kernel start, in device clock nanoseconds
    pub start_ns: u64,
    /// Kernel end, in device clock nanoseconds
    pub end_ns: u64,
}

impl KernelEvent {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// A compute unit that can run the vector-add kernel.
pub trait Accelerator: Send {
    /// Short label for result rows (`cpu`, `gpu`).
    fn label(&self) -> &'static str;

    /// Human-readable device name.
    fn name(&self) -> String;

    /// Run `sum[i] = a[i] + b[i]` for every index of the slices and wait for
    /// completion. All three slices have the same length.
    fn vector_add(&self, a: &[i32], b: &[i32], sum: &mut [i32]) -> Result<KernelEvent>;
}

/// Runs the vector-add kernel over a device range and reports its duration.
pub struct DeviceExecutor {
    device: Box<dyn Accelerator>,
}

impl DeviceExecutor {
    /// Open the device selected by `kind`.
    pub fn open(kind: DeviceKind, device_id: usize) -> Result<Self> {
        let device: Box<dyn Accelerator> = match kind {
            DeviceKind::Cpu => Box::new(HostParallelDevice::new()?),
            DeviceKind::Gpu => open_gpu(device_id)?,
        };
        tracing::info!("Running on device: {}", device.name());
        Ok(Self { device })
    }

    /// Wrap an already constructed device.
    pub fn from_accelerator(device: Box<dyn Accelerator>) -> Self {
        Self { device }
    }

    pub fn label(&self) -> &'static str {
        self.device.label()
    }

    pub fn name(&self) -> String {
        self.device.name()
    }

    /// Submit one kernel over `lanes` and return its device-measured
    /// duration in nanoseconds.
    pub fn run(&self, lanes: Lanes<'_>) -> Result<u64> {
        if lanes.is_empty() {
            return Ok(0);
        }

        let Lanes { a, b, sum, range } = lanes;
        let event = self.device.vector_add(a, b, sum)?;
        tracing::debug!(
            "Device {} finished {} in {} ns",
            self.device.label(),
            range,
            event.duration_ns()
        );
        Ok(event.duration_ns())
    }
}

#[cfg(feature = "cuda")]
fn open_gpu(device_id: usize) -> Result<Box<dyn Accelerator>> {
    Ok(Box::new(crate::cuda::CudaAccelerator::new(device_id)?))
}

#[cfg(not(feature = "cuda"))]
fn open_gpu(device_id: usize) -> Result<Box<dyn Accelerator>> {
    Err(CoprocError::Device(format!(
        "GPU {} requested but this build has no CUDA support (enable the `cuda` feature)",
        device_id
    )))
}

/// Data-parallel device running on a dedicated host worker pool.
///
/// Timestamps come from a monotonic clock started when the device is
/// created and are taken around kernel execution only.
pub struct HostParallelDevice {
    pool: ThreadPool,
    clock: Instant,
}

impl HostParallelDevice {
    /// Create a device using one worker per available core.
    pub fn new() -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .thread_name(|i| format!("coproc-dev-{}", i))
            .build()
            .map_err(|e| CoprocError::Device(format!("Failed to start device pool: {}", e)))?;
        Ok(Self {
            pool,
            clock: Instant::now(),
        })
    }

    fn timestamp(&self) -> u64 {
        self.clock.elapsed().as_nanos() as u64
    }
}

impl Accelerator for HostParallelDevice {
    fn label(&self) -> &'static str {
        DeviceKind::Cpu.label()
    }

    fn name(&self) -> String {
        format!("host-parallel ({} workers)", self.pool.current_num_threads())
    }

    fn vector_add(&self, a: &[i32], b: &[i32], sum: &mut [i32]) -> Result<KernelEvent> {
        if a.len() != sum.len() || b.len() != sum.len() {
            return Err(CoprocError::Device(format!(
                "kernel operands differ in length: {} + {} -> {}",
                a.len(),
                b.len(),
                sum.len()
            )));
        }

        // one work item per element, grouped so each task is not a single add
        const WORK_GROUP: usize = 4096;

        let start_ns = self.timestamp();
        self.pool.install(|| {
            sum.par_chunks_mut(WORK_GROUP)
                .zip(a.par_chunks(WORK_GROUP))
                .zip(b.par_chunks(WORK_GROUP))
                .for_each(|((out, a), b)| add_into(a, b, out));
        });
        let end_ns = self.timestamp();

        Ok(KernelEvent { start_ns, end_ns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::Buffers;
    use crate::partition::SubRange;

    struct OfflineDevice;

    impl Accelerator for OfflineDevice {
        fn label(&self) -> &'static str {
            "gpu"
        }

        fn name(&self) -> String {
            "offline".to_string()
        }

        fn vector_add(&self, _: &[i32], _: &[i32], _: &mut [i32]) -> Result<KernelEvent> {
            Err(CoprocError::Device("submission rejected".to_string()))
        }
    }

    #[test]
    fn test_host_parallel_device_adds() {
        let device = DeviceExecutor::open(DeviceKind::Cpu, 0).unwrap();
        assert_eq!(device.label(), "cpu");

        let mut buffers = Buffers::with_ramp(10_000).unwrap();
        let lanes = buffers.lanes(SubRange::full(10_000)).unwrap();
        device.run(lanes).unwrap();

        for (i, &v) in buffers.sum().iter().enumerate() {
            assert_eq!(v, 2 * i as i32);
        }
    }

    #[test]
    fn test_device_writes_only_its_suffix() {
        let device = DeviceExecutor::open(DeviceKind::Cpu, 0).unwrap();
        let mut buffers = Buffers::with_ramp(100).unwrap();
        buffers.sum_mut().fill(-1);

        let (_, high) = buffers.split(40).unwrap();
        device.run(high).unwrap();

        let sum = buffers.sum();
        assert!(sum[..40].iter().all(|&v| v == -1));
        assert_eq!(sum[40], 80);
        assert_eq!(sum[99], 198);
    }

    #[test]
    fn test_event_timestamps_are_ordered() {
        let device = HostParallelDevice::new().unwrap();
        let a = vec![1; 1000];
        let b = vec![2; 1000];
        let mut sum = vec![0; 1000];
        let event = device.vector_add(&a, &b, &mut sum).unwrap();
        assert!(event.end_ns >= event.start_ns);
        assert!(sum.iter().all(|&v| v == 3));
    }

    #[test]
    fn test_mismatched_operands_rejected() {
        let device = HostParallelDevice::new().unwrap();
        let mut sum = vec![0; 3];
        assert!(device.vector_add(&[1, 2], &[1, 2], &mut sum).is_err());
    }

    #[test]
    fn test_empty_range_skips_submission() {
        let device = DeviceExecutor::from_accelerator(Box::new(OfflineDevice));
        let mut buffers = Buffers::with_ramp(4).unwrap();
        let (_, high) = buffers.split(4).unwrap();
        assert_eq!(device.run(high).unwrap(), 0);
    }

    #[test]
    fn test_submission_failure_propagates() {
        let device = DeviceExecutor::from_accelerator(Box::new(OfflineDevice));
        let mut buffers = Buffers::with_ramp(4).unwrap();
        let lanes = buffers.lanes(SubRange::full(4)).unwrap();
        assert!(matches!(device.run(lanes), Err(CoprocError::Device(_))));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_gpu_unavailable_without_cuda() {
        assert!(matches!(
            DeviceExecutor::open(DeviceKind::Gpu, 0),
            Err(CoprocError::Device(_))
        ));
    }

    #[test]
    fn test_kernel_event_duration_saturates() {
        let event = KernelEvent {
            start_ns: 10,
            end_ns: 5,
        };
        assert_eq!(event.duration_ns(), 0);
    }
}
