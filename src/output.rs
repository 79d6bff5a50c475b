//! Aggregation and rendering of collected samples.
//!
//! Folded mode buckets identical stacks into `root;..;leaf COUNT` lines
//! for flame-graph renderers; timestamped mode preserves the full time
//! series instead. Frames are stored leaf-first internally and reversed
//! here, so rendered stacks read root-first.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::sampler::Profile;
use crate::walker::Frames;

fn render_stack(frames: &Frames) -> String {
    let rendered: Vec<String> = frames.iter().rev().map(ToString::to_string).collect();
    rendered.join(";")
}

fn micros_since_epoch(timestamp: SystemTime) -> u128 {
    timestamp
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros()
}

/// Folds identical stacks into occurrence counts. Keyed on the rendered
/// form, which is in one-to-one correspondence with the frame sequence;
/// the BTreeMap gives deterministic output order.
fn bucket_stacks(profile: &Profile) -> BTreeMap<String, u64> {
    let mut buckets = BTreeMap::new();
    for snapshot in &profile.snapshots {
        if snapshot.frames.is_empty() {
            // Idle snapshots only exist in timestamp mode; the folded idle
            // line comes from the counter.
            continue;
        }
        *buckets.entry(render_stack(&snapshot.frames)).or_insert(0) += 1;
    }
    buckets
}

/// Default output form: one line per unique stack, with an `(idle)` line
/// first when idle time is included and nonzero.
pub fn render_folded(
    profile: &Profile,
    include_idle: bool,
    w: &mut impl Write,
) -> io::Result<()> {
    if include_idle && profile.idle_count > 0 {
        writeln!(w, "(idle) {}", profile.idle_count)?;
    }
    for (stack, count) in bucket_stacks(profile) {
        writeln!(w, "{stack} {count}")?;
    }
    Ok(())
}

/// Timestamped output: per tick, the microsecond wall-clock value on one
/// line, then `(idle)` or the root-first stack.
pub fn render_timestamped(profile: &Profile, w: &mut impl Write) -> io::Result<()> {
    for snapshot in &profile.snapshots {
        writeln!(w, "{}", micros_since_epoch(snapshot.timestamp))?;
        if snapshot.frames.is_empty() {
            writeln!(w, "(idle)")?;
        } else {
            writeln!(w, "{}", render_stack(&snapshot.frames))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::StackSnapshot;
    use crate::walker::FrameDescriptor;
    use std::time::Duration;

    fn frame(name: &str) -> FrameDescriptor {
        FrameDescriptor::new("t.py", name, 1)
    }

    fn profile_of(stacks: Vec<Frames>, idle_count: u64) -> Profile {
        let ticks = stacks.len() as u64 + idle_count;
        Profile {
            snapshots: stacks
                .into_iter()
                .map(|frames| StackSnapshot {
                    timestamp: UNIX_EPOCH,
                    frames,
                })
                .collect(),
            idle_count,
            ticks,
        }
    }

    fn folded(profile: &Profile, include_idle: bool) -> String {
        let mut out = Vec::new();
        render_folded(profile, include_idle, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn identical_stacks_fold_into_one_counted_line() {
        let stack = vec![frame("leaf"), frame("root")];
        let profile = profile_of(vec![stack.clone(), stack.clone(), stack], 0);
        assert_eq!(
            folded(&profile, true),
            "t.py:root:1;t.py:leaf:1 3\n"
        );
    }

    #[test]
    fn leaf_first_internal_order_renders_root_first() {
        // internal [f0, f1, f2] with f0 innermost must print f2;f1;f0
        let profile = profile_of(vec![vec![frame("f0"), frame("f1"), frame("f2")]], 0);
        assert_eq!(
            folded(&profile, true),
            "t.py:f2:1;t.py:f1:1;t.py:f0:1 1\n"
        );
    }

    #[test]
    fn feeding_order_does_not_change_bucket_counts() {
        let a = vec![frame("a")];
        let b = vec![frame("b")];
        let shuffled = profile_of(vec![b.clone(), a.clone(), b.clone(), a.clone(), b.clone()], 0);
        let ordered = profile_of(vec![a.clone(), a, b.clone(), b.clone(), b], 0);
        assert_eq!(folded(&shuffled, true), folded(&ordered, true));
    }

    #[test]
    fn idle_line_tracks_inclusion_and_count() {
        let profile = profile_of(vec![vec![frame("a")]], 4);
        assert_eq!(folded(&profile, true), "(idle) 4\nt.py:a:1 1\n");
        assert!(!folded(&profile, false).contains("(idle)"));
    }

    #[test]
    fn zero_idle_prints_no_idle_line() {
        let profile = profile_of(vec![vec![frame("a")]], 0);
        assert!(!folded(&profile, true).contains("(idle)"));
    }

    #[test]
    fn timestamped_output_preserves_the_time_series() {
        // tick at T0 idle, tick at T0+delta with stack [a, b] leaf-first
        let t0 = UNIX_EPOCH + Duration::from_micros(1_700_000_000_000_000);
        let t1 = t0 + Duration::from_micros(1_000);
        let profile = Profile {
            snapshots: vec![
                StackSnapshot {
                    timestamp: t0,
                    frames: vec![],
                },
                StackSnapshot {
                    timestamp: t1,
                    frames: vec![frame("a"), frame("b")],
                },
            ],
            idle_count: 1,
            ticks: 2,
        };
        let mut out = Vec::new();
        render_timestamped(&profile, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "1700000000000000\n(idle)\n1700000000001000\nt.py:b:1;t.py:a:1\n"
        );
    }
}
