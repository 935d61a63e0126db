//! Pre-execution hook applying resource limits to a guarded tool.
//!
//! The hook runs after `fork()` but before the tool starts in the child, so
//! the limits bind the tool from its first instruction. Only
//! async-signal-safe syscalls are allowed inside it (see [`super::rlimit`]).

use super::config::ProcessLimits;
use super::rlimit;
use std::process::Command;

/// Add the rlimit hook to `cmd`.
///
/// # Safety
///
/// This function uses `unsafe` to set the hook. The hook itself only calls
/// `setrlimit()`. Do NOT add logging, allocation or locking to it.
pub fn add_pre_exec_hook(cmd: &mut Command, limits: ProcessLimits) {
    use std::os::unix::process::CommandExt;

    // SAFETY: The hook only uses async-signal-safe syscalls.
    unsafe {
        cmd.pre_exec(move || {
            rlimit::apply_limits_raw(&limits).map_err(std::io::Error::from_raw_os_error)
        });
    }
}
