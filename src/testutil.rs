//! Shared test fixtures.

use std::collections::HashMap;

use nix::errno::Errno;

use crate::error::TraceError;
use crate::ptracer::VirtualMemory;

/// In-memory stand-in for a target address space. Regions are written at
/// absolute addresses; reads crossing a region boundary fail like an
/// unmapped page would.
pub struct FakeMemory {
    regions: HashMap<u64, Vec<u8>>,
}

impl FakeMemory {
    pub fn new() -> Self {
        FakeMemory {
            regions: HashMap::new(),
        }
    }

    pub fn write(&mut self, addr: u64, bytes: &[u8]) {
        self.regions.insert(addr, bytes.to_vec());
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) {
        self.write(addr, &value.to_ne_bytes());
    }
}

impl VirtualMemory for FakeMemory {
    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, TraceError> {
        for (&start, bytes) in &self.regions {
            let end = start + bytes.len() as u64;
            if addr >= start && addr + len as u64 <= end {
                let off = (addr - start) as usize;
                return Ok(bytes[off..off + len].to_vec());
            }
        }
        Err(TraceError::ReadFailed {
            pid: 0,
            addr,
            len,
            errno: Errno::EFAULT,
        })
    }
}
