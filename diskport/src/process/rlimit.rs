//! Resource limit handling for guarded tools.
//!
//! Only the async-signal-safe `apply_limits_raw()` is used,
//! called from the `pre_exec` hook before exec().

use super::config::ProcessLimits;
#[cfg(test)]
use std::io;

/// Resource type alias for cross-platform compatibility.
/// On Linux glibc, RLIMIT_* are u32; on macOS they're i32.
#[cfg(target_os = "linux")]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(not(target_os = "linux"))]
type RlimitResource = libc::c_int;

/// Get current value of a resource limit.
#[cfg(test)]
#[allow(clippy::unnecessary_cast)]
fn get_rlimit(resource: RlimitResource) -> Result<(u64, u64), io::Error> {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    let result = unsafe { libc::getrlimit(resource, &mut rlim) };

    if result != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok((rlim.rlim_cur as u64, rlim.rlim_max as u64))
}

/// Apply resource limits - async-signal-safe version for pre_exec.
///
/// Runs after `fork()` but before `exec()`, so only async-signal-safe
/// operations are allowed here.
///
/// # Safety
///
/// This function only uses async-signal-safe syscalls (setrlimit).
/// Do NOT add:
/// - Logging (tracing, println)
/// - Memory allocation (Box, Vec, String)
/// - Mutex operations
///
/// # Returns
/// * `Ok(())` - Limits applied successfully
/// * `Err(errno)` - Failed to set a limit (returns raw errno)
pub fn apply_limits_raw(limits: &ProcessLimits) -> Result<(), i32> {
    if let Some(max_mem) = limits.max_memory {
        set_rlimit_raw(libc::RLIMIT_AS, max_mem)?;
    }

    if let Some(max_cpu) = limits.max_cpu_time {
        set_rlimit_raw(libc::RLIMIT_CPU, max_cpu)?;
    }

    Ok(())
}

/// Set a specific resource limit - async-signal-safe version.
#[inline]
fn set_rlimit_raw(resource: RlimitResource, limit: u64) -> Result<(), i32> {
    let rlim = libc::rlimit {
        rlim_cur: limit as libc::rlim_t,
        rlim_max: limit as libc::rlim_t,
    };

    let result = unsafe { libc::setrlimit(resource, &rlim) };

    if result != 0 {
        return Err(get_errno());
    }

    Ok(())
}

/// Get errno in an async-signal-safe way.
#[inline]
fn get_errno() -> i32 {
    #[cfg(target_os = "macos")]
    unsafe {
        *libc::__error()
    }

    #[cfg(target_os = "linux")]
    unsafe {
        *libc::__errno_location()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        libc::ENOSYS
    }
}
