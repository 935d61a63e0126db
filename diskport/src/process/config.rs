//! Resource limit configuration for guarded child processes.

use diskport_shared::constants::limits;
use serde::{Deserialize, Serialize};

/// Resource limits for a single child process.
///
/// Both limits are applied as soft and hard rlimits in the child before
/// exec, so the kernel enforces them without any cooperation from the tool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLimits {
    /// Maximum virtual address space in bytes (RLIMIT_AS).
    #[serde(default)]
    pub max_memory: Option<u64>,

    /// Maximum CPU time in seconds (RLIMIT_CPU).
    #[serde(default)]
    pub max_cpu_time: Option<u64>,
}

impl ProcessLimits {
    /// Limits used while parsing untrusted image headers.
    pub fn image_info() -> Self {
        Self {
            max_memory: Some(limits::INFO_MAX_MEMORY),
            max_cpu_time: Some(limits::INFO_MAX_CPU_SECS),
        }
    }

    /// Whether `signal` is how the kernel enforces one of these limits.
    ///
    /// CPU overrun delivers SIGXCPU at the soft limit (SIGKILL past the hard
    /// one). Address space exhaustion surfaces as a crash when the tool does
    /// not handle the failed allocation itself.
    pub fn is_enforcement_signal(&self, signal: i32) -> bool {
        let cpu = self.max_cpu_time.is_some() && matches!(signal, libc::SIGXCPU | libc::SIGKILL);
        let memory = self.max_memory.is_some()
            && matches!(signal, libc::SIGSEGV | libc::SIGABRT | libc::SIGBUS);
        cpu || memory
    }
}
