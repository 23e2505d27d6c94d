//! # CUDA Vector-Add Device
//!
//! `CudaAccelerator` runs the vector-add kernel on an NVIDIA GPU. The kernel
//! is compiled with NVRTC when the device is opened, so nothing has to be
//! built ahead of time.
//!
//! Per submission the borrowed range is copied to device memory, the kernel
//! is launched between a start and a stop CUDA event on a dedicated stream,
//! and the result is copied back into the caller's slice. The reported
//! duration is the event-to-event time, which excludes both copies and the
//! host-side launch overhead.

use cudarc::driver::result::event;
use cudarc::driver::{sys, CudaDevice, CudaFunction, CudaStream, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::compile_ptx;
use std::sync::Arc;

use crate::config::DeviceKind;
use crate::device::{Accelerator, KernelEvent};
use crate::error::{CoprocError, Result};

const MODULE: &str = "coproc";
const KERNEL: &str = "vector_add";

const KERNEL_SRC: &str = r#"
extern "C" __global__ void vector_add(int *sum, const int *a, const int *b, size_t n) {
    size_t i = (size_t)blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        sum[i] = a[i] + b[i];
    }
}
"#;

/// A CUDA device with the vector-add kernel loaded and timing events ready.
pub struct CudaAccelerator {
    device: Arc<CudaDevice>,
    stream: CudaStream,
    kernel: CudaFunction,
    name: String,
    start_event: sys::CUevent,
    stop_event: sys::CUevent,
}

fn driver_err(what: &'static str) -> impl Fn(cudarc::driver::DriverError) -> CoprocError {
    move |e| CoprocError::Device(format!("{}: {}", what, e))
}

impl CudaAccelerator {
    /// Open GPU `gpu_id`, compile the kernel, and create the timing events.
    pub fn new(gpu_id: usize) -> Result<Self> {
        let device = CudaDevice::new(gpu_id).map_err(driver_err("Failed to initialize CUDA device"))?;

        let stream = device
            .fork_default_stream()
            .map_err(driver_err("Failed to create CUDA stream"))?;

        let ptx = compile_ptx(KERNEL_SRC)
            .map_err(|e| CoprocError::Device(format!("Failed to compile kernel: {:?}", e)))?;
        device
            .load_ptx(ptx, MODULE, &[KERNEL])
            .map_err(driver_err("Failed to load kernel module"))?;
        let kernel = device
            .get_func(MODULE, KERNEL)
            .ok_or_else(|| CoprocError::Device(format!("Kernel '{}' missing from module", KERNEL)))?;

        let start_event = event::create(sys::CUevent_flags_enum::CU_EVENT_DEFAULT)
            .map_err(driver_err("Failed to create start event"))?;
        let stop_event = match event::create(sys::CUevent_flags_enum::CU_EVENT_DEFAULT) {
            Ok(stop) => stop,
            Err(e) => {
                unsafe {
                    event::destroy(start_event).ok();
                }
                return Err(driver_err("Failed to create stop event")(e));
            }
        };

        let name = device
            .name()
            .unwrap_or_else(|_| format!("CUDA device {}", gpu_id));

        tracing::info!("Initialized CUDA device {} ({})", gpu_id, name);

        Ok(Self {
            device,
            stream,
            kernel,
            name,
            start_event,
            stop_event,
        })
    }
}

impl Accelerator for CudaAccelerator {
    fn label(&self) -> &'static str {
        DeviceKind::Gpu.label()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn vector_add(&self, a: &[i32], b: &[i32], sum: &mut [i32]) -> Result<KernelEvent> {
        let n = sum.len();
        if a.len() != n || b.len() != n {
            return Err(CoprocError::Device(format!(
                "kernel operands differ in length: {} + {} -> {}",
                a.len(),
                b.len(),
                n
            )));
        }
        let items = u32::try_from(n)
            .map_err(|_| CoprocError::Device(format!("{} work items exceed one launch", n)))?;

        let d_a = self
            .device
            .htod_sync_copy(a)
            .map_err(driver_err("Failed to copy input a"))?;
        let d_b = self
            .device
            .htod_sync_copy(b)
            .map_err(driver_err("Failed to copy input b"))?;
        // Left uninitialized: the kernel writes every index
        let mut d_sum = unsafe { self.device.alloc::<i32>(n) }
            .map_err(driver_err("Failed to allocate output"))?;

        // Allocation is ordered on the default stream; the kernel stream
        // must not start before it
        self.stream
            .wait_for_default()
            .map_err(driver_err("Failed to order kernel stream"))?;

        let cfg = LaunchConfig::for_num_elems(items);
        unsafe {
            event::record(self.start_event, self.stream.stream)
                .map_err(driver_err("Failed to record start event"))?;
            self.kernel
                .clone()
                .launch_on_stream(&self.stream, cfg, (&mut d_sum, &d_a, &d_b, n))
                .map_err(driver_err("Kernel launch rejected"))?;
            event::record(self.stop_event, self.stream.stream)
                .map_err(driver_err("Failed to record stop event"))?;
        }

        // Asynchronous faults surface here
        self.device
            .synchronize()
            .map_err(driver_err("Kernel execution failed"))?;

        let elapsed_ms = unsafe {
            event::elapsed(self.start_event, self.stop_event)
                .map_err(driver_err("Failed to get elapsed time from events"))?
        };

        self.device
            .dtoh_sync_copy_into(&d_sum, sum)
            .map_err(driver_err("Failed to copy result"))?;

        Ok(KernelEvent {
            start_ns: 0,
            end_ns: (elapsed_ms as f64 * 1_000_000.0) as u64,
        })
    }
}

impl Drop for CudaAccelerator {
    fn drop(&mut self) {
        unsafe {
            event::destroy(self.start_event).ok();
            event::destroy(self.stop_event).ok();
        }
    }
}

// Safety: the raw event handles are only used through &self on one thread
// at a time; the coordinator never shares a device between threads.
unsafe impl Send for CudaAccelerator {}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs an NVIDIA GPU: cargo test --features cuda -- --ignored
    #[test]
    #[ignore]
    fn test_gpu_writes_every_index() {
        let gpu = CudaAccelerator::new(0).unwrap();
        let a: Vec<i32> = (0..100_000).collect();
        let b = a.clone();
        let mut sum = vec![-1; a.len()];

        for _ in 0..3 {
            sum.fill(-1);
            gpu.vector_add(&a, &b, &mut sum).unwrap();
            for (i, &v) in sum.iter().enumerate() {
                assert_eq!(v, 2 * i as i32, "wrong sum at {}", i);
            }
        }
    }

    #[test]
    #[ignore]
    fn test_gpu_rejects_mismatched_operands() {
        let gpu = CudaAccelerator::new(0).unwrap();
        let mut sum = vec![0; 4];
        assert!(matches!(
            gpu.vector_add(&[1, 2, 3], &[1, 2, 3, 4], &mut sum),
            Err(CoprocError::Device(_))
        ));
    }
}
