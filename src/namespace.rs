//! PID/mount namespace awareness for containerized targets.
//!
//! Tracing syscalls always take host-visible PIDs, so no PID translation is
//! ever applied to ptrace itself. What does need translation is every
//! filesystem lookup made on the target's behalf: a containerized python
//! reports `/usr/bin/python3.6` relative to its own root, which from the
//! host is only reachable as `/proc/<pid>/root/usr/bin/python3.6`.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::NamespaceError;

/// Immutable per-run record of the profiler's and target's namespace
/// identity, plus the path translation the difference implies.
#[derive(Debug, Clone)]
pub struct NamespaceContext {
    pid: i32,
    own_mnt: u64,
    target_mnt: u64,
    own_pid_ns: u64,
    target_pid_ns: u64,
}

fn ns_inode(path: &Path) -> Result<u64, NamespaceError> {
    // /proc/<pid>/ns/* are symlinks whose target inode identifies the
    // namespace; stat-ing them follows the link.
    fs::metadata(path)
        .map(|m| m.ino())
        .map_err(|source| NamespaceError::Unreadable {
            path: path.to_path_buf(),
            source,
        })
}

impl NamespaceContext {
    /// Inspects the namespace identity of `pid` versus our own. Fails if the
    /// target's ns metadata is unreadable, which usually means the target
    /// exited or we lack privilege.
    pub fn new(pid: i32) -> Result<Self, NamespaceError> {
        let ctx = NamespaceContext {
            pid,
            own_mnt: ns_inode(Path::new("/proc/self/ns/mnt"))?,
            target_mnt: ns_inode(&PathBuf::from(format!("/proc/{pid}/ns/mnt")))?,
            own_pid_ns: ns_inode(Path::new("/proc/self/ns/pid"))?,
            target_pid_ns: ns_inode(&PathBuf::from(format!("/proc/{pid}/ns/pid")))?,
        };
        if ctx.is_foreign() {
            debug!(
                "pid {pid} lives in a foreign namespace (mnt {:x} vs {:x}); \
                 translating paths through /proc/{pid}/root",
                ctx.target_mnt, ctx.own_mnt
            );
        }
        Ok(ctx)
    }

    /// True when the target is isolated from us in either the mount or PID
    /// namespace dimension.
    pub fn is_foreign(&self) -> bool {
        self.own_mnt != self.target_mnt || self.own_pid_ns != self.target_pid_ns
    }

    /// Rewrites a path reported by the target (e.g. from its memory maps)
    /// into one valid in our own mount namespace.
    pub fn translate(&self, path: &Path) -> PathBuf {
        if !self.is_foreign() {
            return path.to_path_buf();
        }
        let mut translated = PathBuf::from(format!("/proc/{}/root", self.pid));
        // Joining an absolute path would replace the prefix; strip it.
        match path.strip_prefix("/") {
            Ok(rel) => translated.push(rel),
            Err(_) => translated.push(path),
        }
        translated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(own_mnt: u64, target_mnt: u64) -> NamespaceContext {
        NamespaceContext {
            pid: 4242,
            own_mnt,
            target_mnt,
            own_pid_ns: 1,
            target_pid_ns: 1,
        }
    }

    #[test]
    fn same_namespace_paths_pass_through() {
        let ctx = context(7, 7);
        assert!(!ctx.is_foreign());
        assert_eq!(
            ctx.translate(Path::new("/usr/bin/python2.7")),
            PathBuf::from("/usr/bin/python2.7")
        );
    }

    #[test]
    fn foreign_namespace_paths_go_through_proc_root() {
        let ctx = context(7, 8);
        assert!(ctx.is_foreign());
        assert_eq!(
            ctx.translate(Path::new("/usr/lib/libpython3.6m.so.1.0")),
            PathBuf::from("/proc/4242/root/usr/lib/libpython3.6m.so.1.0")
        );
    }

    #[test]
    fn own_process_is_never_foreign() {
        let pid = std::process::id() as i32;
        let ctx = NamespaceContext::new(pid).unwrap();
        assert!(!ctx.is_foreign());
    }
}
