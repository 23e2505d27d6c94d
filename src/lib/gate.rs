//! # Cross-Process Start Gate
//!
//! Lines up the timed section of two independently launched benchmark
//! processes. Both open the same POSIX shared memory segment by name; the
//! first one to arrive creates it. The producer sets a ready flag and carries
//! on, the consumer polls the flag and starts once it reads 1.
//!
//! ```text
//!    Producer Process           Shared Memory            Consumer Process
//! +-------------------+      +----------------+      +-------------------+
//! |  warm-up          |      |  /coproc_gate  |      |  warm-up          |
//! |  signal() --------|----> | ready: 0 -> 1  | <----|-- wait(deadline)  |
//! |  timed run        |      +----------------+      |  timed run        |
//! +-------------------+                              +-------------------+
//! ```
//!
//! The flag lives in the low byte of the first 64-bit word of the segment.
//! The consumer wait takes an optional deadline and fails with
//! `GateError::Timeout` instead of spinning forever when the producer never
//! shows up. Removing the segment is left to whoever owns the pair of runs
//! and is a no-op if it is already gone.

use std::ffi::c_void;
use std::ffi::CString;
use std::mem;
use std::num::NonZeroUsize;
use std::os::unix::io::{FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use libc::{shm_open, shm_unlink, O_CREAT, O_RDWR};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use nix::unistd::ftruncate;
use thiserror::Error;

use crate::config::{GateConfig, GateRole};

/// Errors that can occur while opening or waiting on the gate.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Shared memory error: {0}")]
    Shm(String),
    #[error("Invalid gate name '{0}'")]
    InvalidName(String),
    #[error("Timed out after {waited:?} waiting for producer on {name}")]
    Timeout { name: String, waited: Duration },
}

/// Layout of the shared segment.
#[repr(C, align(64))]
struct GateHeader {
    ready: AtomicU64,
    _pad: [u8; 56],
}

/// Bytes mapped for the gate.
pub const GATE_SIZE: usize = mem::size_of::<GateHeader>();

/// A mapping of the shared handshake segment.
pub struct HandshakeGate {
    /// Name of shared memory region
    name: String,
    /// Pointer to mapped memory
    base_ptr: *mut u8,
    /// Size of mapped region
    map_size: usize,
    _fd: OwnedFd,
}

impl HandshakeGate {
    /// Opens the named segment, creating it if no peer has yet.
    ///
    /// Reusing an existing segment is fine: the size is fixed, so the second
    /// `ftruncate` leaves the flag untouched.
    pub fn open_or_create(name: &str) -> Result<Self, GateError> {
        let shm_name = normalize_name(name)?;
        let c_name =
            CString::new(shm_name.clone()).map_err(|_| GateError::InvalidName(shm_name.clone()))?;

        let fd = unsafe { shm_open(c_name.as_ptr(), O_CREAT | O_RDWR, 0o600) };
        if fd < 0 {
            return Err(GateError::Shm(format!(
                "shm_open {} failed: {}",
                shm_name,
                std::io::Error::last_os_error()
            )));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        ftruncate(&fd, GATE_SIZE as libc::off_t)
            .map_err(|e| GateError::Shm(format!("ftruncate failed: {}", e)))?;

        let length = NonZeroUsize::new(GATE_SIZE)
            .ok_or_else(|| GateError::Shm("zero-sized gate".to_string()))?;
        let base_ptr = unsafe {
            mmap(
                None, // Let kernel choose address
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                Some(&fd),
                0,
            )
            .map_err(|e| GateError::Shm(format!("mmap failed: {}", e)))?
        } as *mut u8;

        tracing::debug!("Mapped gate {} ({} bytes)", shm_name, GATE_SIZE);

        Ok(Self {
            name: shm_name,
            base_ptr,
            map_size: GATE_SIZE,
            _fd: fd,
        })
    }

    fn header(&self) -> &GateHeader {
        unsafe { &*(self.base_ptr as *const GateHeader) }
    }

    /// Set the ready flag (producer).
    pub fn signal(&self) {
        self.header().ready.store(1, Ordering::Release);
    }

    /// Clear the ready flag.
    pub fn reset(&self) {
        self.header().ready.store(0, Ordering::Release);
    }

    /// Check the ready flag (consumer).
    pub fn is_ready(&self) -> bool {
        self.header().ready.load(Ordering::Acquire) & 0xff == 1
    }

    /// Poll until the flag is set, sleeping `poll` between checks.
    ///
    /// Returns how long the wait took, or `GateError::Timeout` once
    /// `timeout` has elapsed without the flag being set.
    pub fn wait(&self, timeout: Option<Duration>, poll: Duration) -> Result<Duration, GateError> {
        let start = Instant::now();
        loop {
            if self.is_ready() {
                return Ok(start.elapsed());
            }

            if let Some(limit) = timeout {
                let waited = start.elapsed();
                if waited >= limit {
                    return Err(GateError::Timeout {
                        name: self.name.clone(),
                        waited,
                    });
                }
            }

            thread::sleep(poll);
        }
    }

    /// Get gate name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unlink the named segment. Returns `false` if it did not exist.
    ///
    /// Processes that still have it mapped keep their mapping.
    pub fn remove(name: &str) -> Result<bool, GateError> {
        let shm_name = normalize_name(name)?;
        let c_name =
            CString::new(shm_name.clone()).map_err(|_| GateError::InvalidName(shm_name.clone()))?;

        if unsafe { shm_unlink(c_name.as_ptr()) } == 0 {
            return Ok(true);
        }

        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::NotFound {
            Ok(false)
        } else {
            Err(GateError::Shm(format!("shm_unlink {} failed: {}", shm_name, err)))
        }
    }
}

impl Drop for HandshakeGate {
    fn drop(&mut self) {
        // Unmap memory; the fd closes with OwnedFd
        if !self.base_ptr.is_null() {
            unsafe {
                let _ = munmap(self.base_ptr as *mut c_void, self.map_size);
            }
        }
    }
}

// Safety: the mapping is only touched through the atomic flag
unsafe impl Send for HandshakeGate {}
unsafe impl Sync for HandshakeGate {}

fn normalize_name(name: &str) -> Result<String, GateError> {
    let shm_name = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    };
    if shm_name.len() < 2 || shm_name[1..].contains('/') {
        return Err(GateError::InvalidName(name.to_string()));
    }
    Ok(shm_name)
}

/// The gate as one side of a run sees it.
pub struct StartGate {
    gate: HandshakeGate,
    role: GateRole,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl StartGate {
    /// Open the segment named in `config`.
    pub fn open(config: &GateConfig) -> Result<Self, GateError> {
        let gate = HandshakeGate::open_or_create(&config.name)?;
        Ok(Self {
            gate,
            role: config.role,
            timeout: config.timeout,
            poll_interval: config.poll_interval,
        })
    }

    pub fn role(&self) -> GateRole {
        self.role
    }

    pub fn name(&self) -> &str {
        self.gate.name()
    }

    /// Producer: raise the flag and return. Consumer: block until raised.
    pub fn pass(&self) -> Result<(), GateError> {
        match self.role {
            GateRole::Producer => {
                self.gate.signal();
                tracing::info!("Signaled start on {}", self.gate.name());
            }
            GateRole::Consumer => {
                tracing::info!("Waiting for producer on {}", self.gate.name());
                let waited = self.gate.wait(self.timeout, self.poll_interval)?;
                tracing::info!(
                    "Producer ready after {:.3} ms",
                    waited.as_secs_f64() * 1000.0
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn unique_name(tag: &str) -> String {
        format!("/coproc_test_{}_{}", std::process::id(), tag)
    }

    #[test]
    fn test_gate_open_twice_shares_flag() {
        let name = unique_name("shared");
        let first = HandshakeGate::open_or_create(&name).unwrap();
        let second = HandshakeGate::open_or_create(&name).unwrap();

        assert!(!first.is_ready());
        assert!(!second.is_ready());
        first.signal();
        assert!(second.is_ready());

        second.reset();
        assert!(!first.is_ready());

        HandshakeGate::remove(&name).unwrap();
    }

    #[test]
    fn test_reopen_keeps_flag() {
        let name = unique_name("reopen");
        let producer = HandshakeGate::open_or_create(&name).unwrap();
        producer.signal();
        drop(producer);

        let consumer = HandshakeGate::open_or_create(&name).unwrap();
        assert!(consumer.is_ready());

        HandshakeGate::remove(&name).unwrap();
    }

    #[test]
    fn test_consumer_waits_for_producer() {
        let name = unique_name("handoff");
        HandshakeGate::remove(&name).unwrap();
        let sent = Arc::new(AtomicBool::new(false));

        let consumer = {
            let name = name.clone();
            let sent = Arc::clone(&sent);
            thread::spawn(move || {
                let gate = HandshakeGate::open_or_create(&name).unwrap();
                gate.wait(Some(Duration::from_secs(10)), Duration::from_micros(10))
                    .unwrap();
                sent.load(Ordering::SeqCst)
            })
        };

        thread::sleep(Duration::from_millis(50));
        let producer = HandshakeGate::open_or_create(&name).unwrap();
        sent.store(true, Ordering::SeqCst);
        producer.signal();

        assert!(consumer.join().unwrap(), "consumer proceeded before the flag was set");
        HandshakeGate::remove(&name).unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let name = unique_name("timeout");
        HandshakeGate::remove(&name).unwrap();
        let gate = HandshakeGate::open_or_create(&name).unwrap();

        let result = gate.wait(Some(Duration::from_millis(20)), Duration::from_millis(1));
        match result {
            Err(GateError::Timeout { waited, .. }) => {
                assert!(waited >= Duration::from_millis(20))
            }
            other => panic!("expected timeout, got {:?}", other),
        }

        HandshakeGate::remove(&name).unwrap();
    }

    #[test]
    fn test_remove_is_idempotent() {
        let name = unique_name("remove");
        let _gate = HandshakeGate::open_or_create(&name).unwrap();
        assert!(HandshakeGate::remove(&name).unwrap());
        assert!(!HandshakeGate::remove(&name).unwrap());
    }

    #[test]
    fn test_name_normalization() {
        assert_eq!(normalize_name("gate").unwrap(), "/gate");
        assert_eq!(normalize_name("/gate").unwrap(), "/gate");
        assert!(normalize_name("/").is_err());
        assert!(normalize_name("/a/b").is_err());
    }

    #[test]
    fn test_start_gate_roles() {
        let name = unique_name("roles");
        HandshakeGate::remove(&name).unwrap();

        let producer = StartGate::open(&GateConfig::new(GateRole::Producer).with_name(&name)).unwrap();
        let consumer = StartGate::open(
            &GateConfig::new(GateRole::Consumer)
                .with_name(&name)
                .with_timeout(Some(Duration::from_secs(5)))
                .with_poll_interval(Duration::from_micros(50)),
        )
        .unwrap();

        producer.pass().unwrap();
        consumer.pass().unwrap();
        assert_eq!(consumer.role(), GateRole::Consumer);
        assert_eq!(consumer.poll_interval, Duration::from_micros(50));

        HandshakeGate::remove(&name).unwrap();
    }
}
