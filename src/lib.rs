//! pystacker: a sampling profiler for running CPython programs.
//!
//! Attaches to a live python process with ptrace, periodically reconstructs
//! its interpreter call stack by reading the process's memory from outside,
//! and emits folded or timestamped stack samples for flame-graph rendering.
//! The target needs no cooperation, instrumentation, or restart.
//!
//! # Example
//!
//! ```rust,no_run
//! fn profile(pid: i32) -> anyhow::Result<()> {
//!     let mut spy = pystacker::PythonSpy::new(pid)?;
//!     let config = pystacker::Config::default();
//!     let profile = pystacker::sampler::run(&mut spy, &pystacker::SystemClock, &config)?;
//!     pystacker::output::render_folded(&profile, config.include_idle, &mut std::io::stdout())?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod layout;
pub mod locator;
pub mod maps;
pub mod namespace;
pub mod output;
pub mod ptracer;
pub mod sampler;
pub mod spy;
pub mod walker;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{LocatorError, NamespaceError, SampleError, TraceError, WalkError};
pub use sampler::{Clock, Config, Profile, StackSnapshot, SystemClock};
pub use spy::{PythonSpy, Spy};
pub use walker::{FrameDescriptor, Frames};
