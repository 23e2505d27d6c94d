//! # Host Executor
//!
//! Adds a contiguous range on a fixed-size worker pool. The range is cut into
//! `threads` chunks of `ceil(len / threads)` elements and each worker writes
//! only its own chunk, so the workers need no synchronization beyond the
//! final join.
//!
//! The pool is built once in `HostExecutor::new`, outside any timed section.

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::buffers::Lanes;
use crate::error::{CoprocError, Result};

/// Fixed-size worker pool for the host-handled prefix.
pub struct HostExecutor {
    pool: ThreadPool,
    threads: usize,
}

impl HostExecutor {
    /// Build a pool of exactly `threads` workers.
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(CoprocError::Configuration(
                "host thread count must be positive".to_string(),
            ));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("coproc-host-{}", i))
            .build()
            .map_err(|e| CoprocError::ThreadPool(e.to_string()))?;

        tracing::debug!("Initialized host pool with {} workers", threads);

        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Compute `sum[i] = a[i] + b[i]` over the lanes, blocking until every
    /// chunk is done.
    pub fn run(&self, lanes: Lanes<'_>) {
        if lanes.is_empty() {
            return;
        }

        let chunk = chunk_len(lanes.len(), self.threads);
        tracing::debug!(
            "Host pool adding {} ({} elements, chunk {})",
            lanes.range,
            lanes.len(),
            chunk
        );

        let Lanes { a, b, sum, .. } = lanes;
        self.pool.scope(|scope| {
            for ((out, a), b) in sum
                .chunks_mut(chunk)
                .zip(a.chunks(chunk))
                .zip(b.chunks(chunk))
            {
                scope.spawn(move |_| add_into(a, b, out));
            }
        });
    }
}

/// Elements per worker: `ceil(len / threads)`, never zero.
pub fn chunk_len(len: usize, threads: usize) -> usize {
    len.div_ceil(threads.max(1)).max(1)
}

/// Sequential elementwise add with wrapping overflow.
pub(crate) fn add_into(a: &[i32], b: &[i32], out: &mut [i32]) {
    for ((out, &a), &b) in out.iter_mut().zip(a).zip(b) {
        *out = a.wrapping_add(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::Buffers;
    use crate::partition::SubRange;

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            HostExecutor::new(0),
            Err(CoprocError::Configuration(_))
        ));
    }

    #[test]
    fn test_pool_has_requested_size() {
        let host = HostExecutor::new(3).unwrap();
        assert_eq!(host.threads(), 3);
        assert_eq!(host.pool.current_num_threads(), 3);
    }

    #[test]
    fn test_chunk_len() {
        assert_eq!(chunk_len(1000, 8), 125);
        assert_eq!(chunk_len(1001, 8), 126);
        assert_eq!(chunk_len(3, 8), 1);
        assert_eq!(chunk_len(0, 8), 1);
    }

    #[test]
    fn test_full_range() {
        let host = HostExecutor::new(4).unwrap();
        let mut buffers = Buffers::with_ramp(1003).unwrap();
        let lanes = buffers.lanes(SubRange::full(1003)).unwrap();
        host.run(lanes);

        for (i, &v) in buffers.sum().iter().enumerate() {
            assert_eq!(v, 2 * i as i32, "mismatch at {}", i);
        }
    }

    #[test]
    fn test_writes_stay_inside_range() {
        let host = HostExecutor::new(3).unwrap();
        let mut buffers = Buffers::with_ramp(100).unwrap();
        buffers.sum_mut().fill(-1);

        let lanes = buffers.lanes(SubRange::new(10, 50, 100).unwrap()).unwrap();
        host.run(lanes);

        let sum = buffers.sum();
        assert!(sum[..10].iter().all(|&v| v == -1));
        assert!(sum[60..].iter().all(|&v| v == -1));
        for i in 10..60 {
            assert_eq!(sum[i], 2 * i as i32);
        }
    }

    #[test]
    fn test_more_threads_than_elements() {
        let host = HostExecutor::new(16).unwrap();
        let mut buffers = Buffers::with_ramp(5).unwrap();
        let lanes = buffers.lanes(SubRange::full(5)).unwrap();
        host.run(lanes);
        assert_eq!(buffers.sum(), &[0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_wrapping_add() {
        let mut out = [0i32; 2];
        add_into(&[i32::MAX, 1], &[1, 2], &mut out);
        assert_eq!(out, [i32::MIN, 3]);
    }
}
