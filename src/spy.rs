//! Target session: ties the tracer, namespace resolver, locator and walker
//! into a reusable sampling handle.
//!
//! Construction does the expensive one-time work (namespace resolution and
//! thread-state location) under a single attach window. Each subsequent
//! sample is a short attach / walk / detach cycle, so the target runs
//! freely between samples.

use anyhow::{Context, Result};
use log::info;

use crate::error::SampleError;
use crate::layout::StructLayout;
use crate::locator::{self, ThreadStateAddr};
use crate::namespace::NamespaceContext;
use crate::ptracer::Ptracer;
use crate::walker::{self, Frames};

/// A source of stack snapshots. The sampling scheduler only sees this
/// trait, so it can be driven by a scripted fake in tests.
pub trait Spy {
    /// Takes one snapshot of the target's interpreter stack. An empty
    /// sequence means the target is idle.
    fn sample(&mut self) -> Result<Frames, SampleError>;
}

pub struct PythonSpy {
    pid: i32,
    tstate: ThreadStateAddr,
    layout: &'static StructLayout,
}

impl PythonSpy {
    /// Attaches once to resolve the namespace context and thread-state
    /// address, then releases the target. Any failure here is fatal: no
    /// sample can be taken without the address.
    pub fn new(pid: i32) -> Result<Self> {
        let traced = Ptracer::attach(pid)
            .with_context(|| format!("cannot attach to process {pid}"))?;
        let ns = NamespaceContext::new(pid)
            .with_context(|| format!("cannot resolve namespaces of process {pid}"))?;
        let (tstate, layout) = locator::locate_thread_state(pid, &ns, &traced)
            .with_context(|| format!("cannot locate interpreter state in process {pid}"))?;
        traced.detach()?;
        info!("profiling pid {pid}, thread state at {:#x}", tstate.0);
        Ok(PythonSpy {
            pid,
            tstate,
            layout,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }
}

impl Spy for PythonSpy {
    fn sample(&mut self) -> Result<Frames, SampleError> {
        // Attach failure mid-run means the target exited or became
        // untraceable; either way the run is over.
        let traced =
            Ptracer::attach(self.pid).map_err(|e| SampleError::TargetGone(e.to_string()))?;
        let result = walker::snapshot(&traced, self.layout, self.tstate);
        // Errors from the walk must not leave the target stopped.
        let _ = traced.detach();
        result.map_err(|e| {
            if e.target_gone() {
                SampleError::TargetGone(e.to_string())
            } else {
                SampleError::Tick(e)
            }
        })
    }
}
