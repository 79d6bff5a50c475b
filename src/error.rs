//! Error taxonomy for the introspection pipeline.
//!
//! Startup errors (`TraceError` on the first attach, `NamespaceError`,
//! `LocatorError`) are fatal; `WalkError` is recoverable at the sampling
//! loop, where a single bad tick is skipped. The binary entry point is the
//! only place any of these turn into an exit code.

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Failures of the ptrace layer: attach, detach, remote memory reads.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("process {0} does not exist")]
    NoSuchProcess(i32),

    #[error("permission denied attaching to process {0} (are you root, or is it already traced?)")]
    PermissionDenied(i32),

    #[error("failed to attach to process {pid}: {errno}")]
    AttachFailed { pid: i32, errno: Errno },

    #[error("process {pid} stopped with unexpected wait status {status}")]
    UnexpectedStop { pid: i32, status: String },

    #[error("failed to read {len} bytes at {addr:#x} in process {pid}: {errno}")]
    ReadFailed {
        pid: i32,
        addr: u64,
        len: usize,
        errno: Errno,
    },
}

impl TraceError {
    /// True when the error means the target is gone rather than momentarily
    /// unreadable. The scheduler uses this to end the run instead of
    /// retrying.
    pub fn target_gone(&self) -> bool {
        match self {
            TraceError::NoSuchProcess(_) => true,
            TraceError::AttachFailed { errno, .. } => *errno == Errno::ESRCH,
            TraceError::ReadFailed { errno, .. } => *errno == Errno::ESRCH,
            _ => false,
        }
    }
}

/// Failures resolving the target's PID/mount namespace identity.
#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("cannot read namespace metadata {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures locating the interpreter's thread-state address. Always fatal:
/// without it there is nothing to sample.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("cannot read memory maps of process {pid}: {source}")]
    Maps {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("no python or libpython image mapped in process {0}; not a CPython process?")]
    NoPythonMapping(i32),

    #[error("cannot open {path} for symbol lookup: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ELF image {path}: {source}")]
    Elf {
        path: PathBuf,
        #[source]
        source: object::Error,
    },

    #[error("unsupported python build: {0}")]
    UnsupportedRuntime(String),

    #[error("symbol `{symbol}` not found in {path}; unsupported or stripped python build")]
    SymbolMissing { symbol: &'static str, path: PathBuf },

    #[error("interpreter has no thread state yet; target never started executing python code")]
    NoThreadState,

    #[error(transparent)]
    Trace(#[from] TraceError),
}

/// Failures while walking one tick's frame chain. Recoverable: the target
/// may have been caught mid-mutation, so the tick is dropped and sampling
/// continues.
#[derive(Debug, Error)]
pub enum WalkError {
    #[error("frame chain exceeded {0} levels; corrupted or cyclic")]
    DepthExceeded(usize),

    #[error("implausible string length {len} at {addr:#x}")]
    BadString { addr: u64, len: i64 },

    #[error(transparent)]
    Trace(#[from] TraceError),
}

impl WalkError {
    pub fn target_gone(&self) -> bool {
        matches!(self, WalkError::Trace(e) if e.target_gone())
    }
}

/// Per-tick outcome classification at the spy boundary, consumed by the
/// sampling scheduler.
#[derive(Debug, Error)]
pub enum SampleError {
    /// The target exited or became untraceable. Ends the run; data collected
    /// so far is still emitted.
    #[error("target process is gone: {0}")]
    TargetGone(String),

    /// Transient per-tick failure; the tick is skipped.
    #[error("sample failed: {0}")]
    Tick(#[from] WalkError),
}
