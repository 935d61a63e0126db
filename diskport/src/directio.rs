//! Direct I/O capability probing.
//!
//! Before writing a destination the engine asks whether the storage under
//! it accepts `O_DIRECT`. Opening with the flag succeeds only when the
//! filesystem or device supports unbuffered I/O; `EINVAL` means it does not.
//! Results are never cached because the destination can change between calls.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Answers whether a path supports unbuffered (direct) I/O.
pub trait DirectIoChecker: Send + Sync {
    /// Probe a regular file, creating it temporarily when it does not exist.
    fn check_file(&self, path: &Path) -> io::Result<bool>;

    /// Probe an existing block device. Never creates anything.
    fn check_block_device(&self, path: &Path) -> io::Result<bool>;
}

/// Probes the real filesystem with `O_DIRECT` opens.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsDirectIo;

impl OsDirectIo {
    pub fn new() -> Self {
        Self
    }

    fn probe(path: &Path, create: bool) -> io::Result<bool> {
        let result = OpenOptions::new()
            .read(true)
            .write(create)
            .create_new(create)
            .mode(0o600)
            .custom_flags(libc::O_DIRECT)
            .open(path);

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl DirectIoChecker for OsDirectIo {
    fn check_file(&self, path: &Path) -> io::Result<bool> {
        match fs::symlink_metadata(path) {
            // Dangling link: the target is the tool's to create, never ours.
            Ok(meta) if meta.file_type().is_symlink() && fs::metadata(path).is_err() => {
                tracing::debug!(
                    "{} is a dangling symlink, assuming no direct I/O",
                    path.display()
                );
                return Ok(false);
            }
            Ok(_) => return Self::probe(path, false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        // A file created here inherits the filesystem's O_DIRECT support.
        // O_EXCL never follows links and fails if something appeared meanwhile.
        let supported = Self::probe(path, true);
        if let Err(e) = &supported
            && e.kind() == io::ErrorKind::AlreadyExists
        {
            return supported;
        }
        if let Err(e) = fs::remove_file(path)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove direct I/O probe {}: {}", path.display(), e);
        }
        supported
    }

    fn check_block_device(&self, path: &Path) -> io::Result<bool> {
        Self::probe(path, false)
    }
}
