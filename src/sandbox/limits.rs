//! OS resource ceilings for the sandboxed child.
//!
//! Limits are applied in the forked child right before `exec`. Every failure
//! to apply one is ignored and the child runs unguarded; the only hard bounds
//! left are the process boundary and the wall-clock timeout.

use serde::{Deserialize, Serialize};
use std::process::Command;

const MIB: u64 = 1024 * 1024;

/// Per-process ceilings installed with `setrlimit` (soft == hard).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_secs: u64,
    pub memory_bytes: u64,
    pub data_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_secs: 2,
            memory_bytes: 512 * MIB,
            data_bytes: 64 * MIB,
        }
    }
}

impl ResourceLimits {
    pub fn from_mib(cpu_secs: u64, memory_mib: u64, data_mib: u64) -> Self {
        Self {
            cpu_secs,
            memory_bytes: memory_mib.saturating_mul(MIB),
            data_bytes: data_mib.saturating_mul(MIB),
        }
    }
}

/// How the sandbox bounds the child's resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limiter {
    /// Apply `setrlimit` ceilings where the platform has them.
    Rlimit(ResourceLimits),
    /// No ceilings at all. Also what `Rlimit` degrades to off unix.
    Unlimited,
}

impl Default for Limiter {
    fn default() -> Self {
        Limiter::Rlimit(ResourceLimits::default())
    }
}

impl Limiter {
    /// Whether this limiter actually constrains the child on this platform.
    pub fn is_enforced(&self) -> bool {
        matches!(self, Limiter::Rlimit(_)) && cfg!(unix)
    }

    pub(crate) fn install(&self, command: &mut Command) {
        match self {
            Limiter::Rlimit(limits) => install_rlimits(command, *limits),
            Limiter::Unlimited => {}
        }
    }
}

#[cfg(unix)]
fn install_rlimits(command: &mut Command, limits: ResourceLimits) {
    use std::os::unix::process::CommandExt;

    // SAFETY: the closure only issues setrlimit syscalls, which are
    // async-signal-safe, and allocates nothing between fork and exec.
    unsafe {
        command.pre_exec(move || {
            apply_in_child(&limits);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn install_rlimits(_command: &mut Command, _limits: ResourceLimits) {}

#[cfg(unix)]
fn apply_in_child(limits: &ResourceLimits) {
    use nix::sys::resource::{setrlimit, Resource};

    let _ = setrlimit(Resource::RLIMIT_CPU, limits.cpu_secs, limits.cpu_secs);

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
    {
        let _ = setrlimit(
            Resource::RLIMIT_AS,
            limits.memory_bytes,
            limits.memory_bytes,
        );
    }

    let _ = setrlimit(Resource::RLIMIT_DATA, limits.data_bytes, limits.data_bytes);
}
