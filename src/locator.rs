//! Interpreter state location.
//!
//! One-time, front-loaded work: find the CPython image in the target's
//! mappings, parse its ELF symbol table for `interp_head`, correct for
//! position-independent loading, then chase
//! `interp_head -> PyInterpreterState -> tstate_head` to the thread-state
//! address every subsequent sample starts from.

use std::fs::File;
use std::path::Path;

use log::{debug, info};
use memmap2::Mmap;
use object::{Object, ObjectKind, ObjectSymbol};

use crate::error::LocatorError;
use crate::layout::{self, StructLayout};
use crate::maps;
use crate::namespace::NamespaceContext;
use crate::ptracer::VirtualMemory;

const INTERP_HEAD_SYMBOL: &str = "interp_head";

/// Absolute address of the target's PyThreadState, stable for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadStateAddr(pub u64);

/// Finds `symbol` in the ELF image at `path` and returns its absolute
/// address in the target, correcting for PIE: a shared object or PIE
/// executable links at zero, so its symbol values are offsets from the
/// load base.
fn symbol_address(
    path: &Path,
    load_base: u64,
    symbol: &'static str,
) -> Result<u64, LocatorError> {
    let file = File::open(path).map_err(|source| LocatorError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    // Safety: the mapping is read-only and the image file of a running
    // interpreter is not going to be truncated under us.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|source| LocatorError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let elf = object::File::parse(&*mmap).map_err(|source| LocatorError::Elf {
        path: path.to_path_buf(),
        source,
    })?;

    let static_addr = elf
        .symbols()
        .chain(elf.dynamic_symbols())
        .find(|sym| sym.name() == Ok(symbol))
        .map(|sym| sym.address())
        .ok_or(LocatorError::SymbolMissing {
            symbol,
            path: path.to_path_buf(),
        })?;

    let absolute = match elf.kind() {
        ObjectKind::Dynamic => load_base + static_addr,
        _ => static_addr,
    };
    debug!("{symbol} at {absolute:#x} ({static_addr:#x} in {})", path.display());
    Ok(absolute)
}

/// Follows the interpreter-state chain in target memory down to the first
/// thread state. The target must be stopped while this runs.
fn chase_thread_state(
    mem: &dyn VirtualMemory,
    layout: &StructLayout,
    interp_head_addr: u64,
) -> Result<ThreadStateAddr, LocatorError> {
    let istate_addr = mem.read_u64(interp_head_addr)?;
    if istate_addr == 0 {
        return Err(LocatorError::NoThreadState);
    }
    let tstate_addr = mem.read_u64(istate_addr + layout.istate_tstate_head)?;
    if tstate_addr == 0 {
        return Err(LocatorError::NoThreadState);
    }
    Ok(ThreadStateAddr(tstate_addr))
}

/// Resolves the thread-state address and layout for an attached target.
/// Called exactly once per run; the result is reused by every sample.
pub fn locate_thread_state(
    pid: i32,
    ns: &NamespaceContext,
    mem: &dyn VirtualMemory,
) -> Result<(ThreadStateAddr, &'static StructLayout), LocatorError> {
    let mappings = maps::read_process_maps(pid)?;
    let image = maps::find_python_image(&mappings).ok_or(LocatorError::NoPythonMapping(pid))?;

    let (major, minor) = layout::version_from_path(&image.path)?;
    let layout = StructLayout::for_version(major, minor)?;
    info!(
        "pid {pid} runs python {major}.{minor} via {} (base {:#x})",
        image.path.display(),
        image.load_base
    );

    let host_path = ns.translate(&image.path);
    let interp_head_addr = symbol_address(&host_path, image.load_base, INTERP_HEAD_SYMBOL)?;
    let tstate = chase_thread_state(mem, layout, interp_head_addr)?;
    debug!("thread state at {:#x}", tstate.0);
    Ok((tstate, layout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeMemory;

    fn py2() -> &'static StructLayout {
        StructLayout::for_version(2, 7).unwrap()
    }

    #[test]
    fn chases_interp_head_to_first_thread_state() {
        let layout = py2();
        let mut mem = FakeMemory::new();
        mem.write_u64(0x1000, 0x2000); // interp_head -> PyInterpreterState
        mem.write_u64(0x2000 + layout.istate_tstate_head, 0x3000); // tstate_head
        let tstate = chase_thread_state(&mem, layout, 0x1000).unwrap();
        assert_eq!(tstate, ThreadStateAddr(0x3000));
    }

    #[test]
    fn null_interpreter_means_no_thread_state() {
        let mut mem = FakeMemory::new();
        mem.write_u64(0x1000, 0);
        assert!(matches!(
            chase_thread_state(&mem, py2(), 0x1000),
            Err(LocatorError::NoThreadState)
        ));
    }

    #[test]
    fn null_tstate_head_means_no_thread_state() {
        let layout = py2();
        let mut mem = FakeMemory::new();
        mem.write_u64(0x1000, 0x2000);
        mem.write_u64(0x2000 + layout.istate_tstate_head, 0);
        assert!(matches!(
            chase_thread_state(&mem, layout, 0x1000),
            Err(LocatorError::NoThreadState)
        ));
    }

    #[test]
    fn missing_symbol_is_reported_as_such() {
        // Our own test binary is a perfectly good ELF without interp_head.
        let err = symbol_address(Path::new("/proc/self/exe"), 0, INTERP_HEAD_SYMBOL)
            .expect_err("rust binaries do not embed a python interpreter");
        assert!(matches!(err, LocatorError::SymbolMissing { .. }));
    }
}
