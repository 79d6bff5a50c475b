//! Process tracing: scoped attach/detach and remote memory reads.
//!
//! While a [`TracedProcess`] exists the target is fully stopped, so its
//! memory can be read consistently. The handle detaches on drop, which
//! guarantees the target is resumed on every exit path, including panics
//! and error returns mid-sample.

use std::ffi::c_void;

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;

use crate::error::TraceError;

const WORD: usize = size_of::<libc::c_long>();

/// Read-only view of another process's address space.
///
/// Implemented by [`TracedProcess`] for live targets and by in-memory fakes
/// in tests, so the frame walker and locator never depend on ptrace
/// directly.
pub trait VirtualMemory {
    /// Returns exactly `len` bytes at `addr`, or an error. Partial reads are
    /// never returned.
    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, TraceError>;

    fn read_u64(&self, addr: u64) -> Result<u64, TraceError> {
        let bytes = self.read_memory(addr, 8)?;
        Ok(u64::from_ne_bytes(bytes.try_into().unwrap()))
    }

    fn read_i64(&self, addr: u64) -> Result<i64, TraceError> {
        Ok(self.read_u64(addr)? as i64)
    }

    fn read_i32(&self, addr: u64) -> Result<i32, TraceError> {
        let bytes = self.read_memory(addr, 4)?;
        Ok(i32::from_ne_bytes(bytes.try_into().unwrap()))
    }
}

/// Factory for attach; exists mostly so the attach errno classification has
/// one home.
pub struct Ptracer;

impl Ptracer {
    /// Stops `pid` and returns a handle whose lifetime bounds the stop
    /// window. Fails if the process does not exist, we lack permission, or
    /// another tracer already holds it.
    pub fn attach(pid: i32) -> Result<TracedProcess, TraceError> {
        ptrace::attach(Pid::from_raw(pid)).map_err(|errno| match errno {
            Errno::ESRCH => TraceError::NoSuchProcess(pid),
            Errno::EPERM => TraceError::PermissionDenied(pid),
            errno => TraceError::AttachFailed { pid, errno },
        })?;

        // The kernel considers the target attached from here on, so the
        // handle must exist before anything else can fail; its drop is
        // what releases the stop if the confirmation below errors out.
        let traced = TracedProcess { pid, attached: true };
        traced.wait_for_stop()?;
        Ok(traced)
    }
}

/// An attached (stopped) target. Reads are only valid through this handle;
/// dropping it resumes the target.
pub struct TracedProcess {
    pid: i32,
    attached: bool,
}

impl TracedProcess {
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// The attach is not complete until the target actually stops.
    fn wait_for_stop(&self) -> Result<(), TraceError> {
        match waitpid(Pid::from_raw(self.pid), None) {
            Ok(WaitStatus::Stopped(_, _)) => {
                debug!("attached to pid {}", self.pid);
                Ok(())
            }
            Ok(status) => Err(TraceError::UnexpectedStop {
                pid: self.pid,
                status: format!("{status:?}"),
            }),
            Err(errno) => Err(TraceError::AttachFailed {
                pid: self.pid,
                errno,
            }),
        }
    }

    /// Resumes the target. A target that already exited is a success: the
    /// point of detach is "do not hold the target paused", and a dead
    /// target cannot be paused.
    pub fn detach(mut self) -> Result<(), TraceError> {
        self.detach_inner();
        Ok(())
    }

    fn detach_inner(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        match ptrace::detach(Pid::from_raw(self.pid), None) {
            Ok(()) | Err(Errno::ESRCH) => debug!("detached from pid {}", self.pid),
            Err(errno) => warn!("failed to detach from pid {}: {errno}", self.pid),
        }
    }
}

impl VirtualMemory for TracedProcess {
    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, TraceError> {
        let mut buf = Vec::with_capacity(len.next_multiple_of(WORD));
        while buf.len() < len {
            let word_addr = addr + buf.len() as u64;
            let word = ptrace::read(Pid::from_raw(self.pid), word_addr as *mut c_void).map_err(
                |errno| TraceError::ReadFailed {
                    pid: self.pid,
                    addr,
                    len,
                    errno,
                },
            )?;
            buf.extend_from_slice(&word.to_ne_bytes());
        }
        buf.truncate(len);
        Ok(buf)
    }
}

impl Drop for TracedProcess {
    fn drop(&mut self) {
        self.detach_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeMemory;

    #[test]
    fn typed_reads_decode_native_endian() {
        let mut mem = FakeMemory::new();
        mem.write(0x1000, &0xdead_beef_u64.to_ne_bytes());
        mem.write(0x2000, &(-7_i32).to_ne_bytes());
        assert_eq!(mem.read_u64(0x1000).unwrap(), 0xdead_beef);
        assert_eq!(mem.read_i32(0x2000).unwrap(), -7);
    }

    #[test]
    fn unmapped_read_is_an_error() {
        let mem = FakeMemory::new();
        assert!(mem.read_u64(0x1234).is_err());
    }

    #[test]
    fn dropped_handle_releases_the_target() {
        use std::process::Command;

        // Every post-attach failure path relies on the handle's drop to
        // resume the tracee; if drop leaked the attachment, the second
        // attach below would fail with EPERM (already traced).
        let Ok(mut child) = Command::new("sleep").arg("30").spawn() else {
            return;
        };
        let pid = child.id() as i32;

        drop(Ptracer::attach(pid).expect("first attach to own child"));
        let traced = Ptracer::attach(pid).expect("re-attach after drop");
        traced.detach().unwrap();

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn attach_to_nonexistent_pid_fails() {
        // Kernel pid limit is far below this.
        let err = match Ptracer::attach(0x3fff_fffe) {
            Err(e) => e,
            Ok(_) => panic!("attached to a pid that cannot exist"),
        };
        assert!(err.target_gone() || matches!(err, TraceError::PermissionDenied(_)));
    }
}
