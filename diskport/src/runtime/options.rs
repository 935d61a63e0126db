//! Configuration for the diskport engine.

use crate::process::ProcessLimits;
use crate::runtime::constants::{envs, paths, tools};
use diskport_shared::errors::{DiskportError, DiskportResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options the engine is constructed with.
///
/// Read once at startup and handed to [`QemuImg`](crate::QemuImg); nothing
/// is looked up from the environment afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Import job owning this process, the progress metric key.
    ///
    /// None disables progress publication.
    #[serde(default)]
    pub owner_uid: Option<String>,

    /// qemu-img binary.
    ///
    /// Default: `qemu-img` (resolved through PATH)
    #[serde(default = "default_qemu_img")]
    pub qemu_img: PathBuf,

    /// dd binary used for block volume preallocation.
    ///
    /// Default: `dd` (resolved through PATH)
    #[serde(default = "default_dd")]
    pub dd: PathBuf,

    /// Log written by the nbdkit export helper.
    ///
    /// Appended to conversion errors when it exists.
    /// Default: /tmp/nbdkit.log
    #[serde(default = "default_nbdkit_log_path")]
    pub nbdkit_log_path: PathBuf,

    /// Limits for `qemu-img info` on untrusted images.
    ///
    /// Default: 1 GiB address space, 30 CPU seconds
    #[serde(default = "ProcessLimits::image_info")]
    pub info_limits: ProcessLimits,
}

// Default value functions for serde

fn default_qemu_img() -> PathBuf {
    PathBuf::from(tools::QEMU_IMG)
}

fn default_dd() -> PathBuf {
    PathBuf::from(tools::DD)
}

fn default_nbdkit_log_path() -> PathBuf {
    PathBuf::from(paths::NBDKIT_LOG)
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            owner_uid: None,
            qemu_img: default_qemu_img(),
            dd: default_dd(),
            nbdkit_log_path: default_nbdkit_log_path(),
            info_limits: ProcessLimits::image_info(),
        }
    }
}

impl EngineOptions {
    /// Defaults plus the owner read from `OWNER_UID`.
    pub fn from_env() -> Self {
        let owner_uid = std::env::var(envs::OWNER_UID)
            .ok()
            .filter(|v| !v.is_empty());
        if owner_uid.is_none() {
            tracing::debug!("{} not set, progress metrics disabled", envs::OWNER_UID);
        }
        Self {
            owner_uid,
            ..Default::default()
        }
    }

    /// Reject configurations that would parse untrusted images unbounded.
    pub fn validate(&self) -> DiskportResult<()> {
        if self.info_limits.max_memory.is_none() && self.info_limits.max_cpu_time.is_none() {
            return Err(DiskportError::Config(
                "info_limits must bound memory or CPU time".to_string(),
            ));
        }
        if self.qemu_img.as_os_str().is_empty() || self.dd.as_os_str().is_empty() {
            return Err(DiskportError::Config("tool paths must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.qemu_img, PathBuf::from("qemu-img"));
        assert_eq!(options.nbdkit_log_path, PathBuf::from("/tmp/nbdkit.log"));
        assert_eq!(options.info_limits, ProcessLimits::image_info());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_deserialize_uses_field_defaults() {
        let options: EngineOptions =
            serde_json::from_str(r#"{"owner_uid": "1234-abcd", "dd": "/usr/bin/dd"}"#).unwrap();
        assert_eq!(options.owner_uid.as_deref(), Some("1234-abcd"));
        assert_eq!(options.dd, PathBuf::from("/usr/bin/dd"));
        assert_eq!(options.qemu_img, PathBuf::from("qemu-img"));
        assert_eq!(options.info_limits, ProcessLimits::image_info());
    }

    #[test]
    fn test_unbounded_info_limits_rejected() {
        let options = EngineOptions {
            info_limits: ProcessLimits::default(),
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(DiskportError::Config(_))));
    }
}
