//! Sampling scheduler: attach -> snapshot -> detach -> sleep, repeated
//! until the configured duration elapses or the target goes away.
//!
//! Timing is threaded through an injected [`Clock`] rather than read
//! ambiently, so the whole loop is testable against scripted spies and
//! simulated time.

use std::time::{Duration, SystemTime};

use log::{debug, info, warn};

use crate::error::SampleError;
use crate::spy::Spy;
use crate::walker::Frames;

/// Wall-clock source and sleeper, injectable for tests.
pub trait Clock {
    fn now(&self) -> SystemTime;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Run parameters, straight from the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Total sampling duration.
    pub duration: Duration,
    /// Target inter-sample interval; best effort, not hard real-time.
    pub interval: Duration,
    /// Whether idle time appears in folded output.
    pub include_idle: bool,
    /// Per-tick timestamped output instead of aggregation.
    pub timestamps: bool,
}

impl Default for Config {
    fn default() -> Self {
        // pyflame-compatible defaults: 1 second at 1ms.
        Config {
            duration: Duration::from_secs(1),
            interval: Duration::from_millis(1),
            include_idle: true,
            timestamps: false,
        }
    }
}

/// One sampling tick's result. An empty frame sequence denotes idle; it is
/// only materialized in timestamp mode, where the time series must stay
/// complete.
#[derive(Debug, Clone)]
pub struct StackSnapshot {
    pub timestamp: SystemTime,
    pub frames: Frames,
}

/// Everything one run observed.
#[derive(Debug, Default)]
pub struct Profile {
    pub snapshots: Vec<StackSnapshot>,
    /// Idle ticks, counted even when not materialized as snapshots.
    pub idle_count: u64,
    /// Successful ticks (idle and non-idle); skipped ticks not included.
    pub ticks: u64,
}

impl Profile {
    /// True when the run observed nothing at all, which turns an early
    /// target death from a normal end-of-run into a failure.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.idle_count == 0
    }
}

/// Drives the sampling loop to completion. Early target death with data
/// already collected is a normal end of run; with nothing collected it is
/// promoted to the terminating error.
pub fn run(spy: &mut dyn Spy, clock: &dyn Clock, config: &Config) -> Result<Profile, SampleError> {
    let mut profile = Profile::default();
    let end = clock.now() + config.duration;

    loop {
        match spy.sample() {
            Ok(frames) => {
                let timestamp = clock.now();
                profile.ticks += 1;
                if frames.is_empty() {
                    profile.idle_count += 1;
                    if config.timestamps {
                        profile.snapshots.push(StackSnapshot {
                            timestamp,
                            frames,
                        });
                    }
                } else {
                    profile.snapshots.push(StackSnapshot { timestamp, frames });
                }
            }
            Err(SampleError::Tick(e)) => {
                // Transient race with the target's own stack mutation;
                // drop the tick and keep sampling.
                debug!("skipping tick: {e}");
            }
            Err(SampleError::TargetGone(reason)) => {
                if profile.is_empty() {
                    return Err(SampleError::TargetGone(reason));
                }
                info!("target gone after {} ticks: {reason}", profile.ticks);
                break;
            }
        }

        if clock.now() + config.interval >= end {
            break;
        }
        clock.sleep(config.interval);
    }

    if profile.ticks == 0 {
        warn!("run finished without a single successful tick");
    }
    Ok(profile)
}
