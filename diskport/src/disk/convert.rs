//! Raw conversion helpers: cache mode resolution and argument lists.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use diskport_shared::errors::{DiskportError, DiskportResult};

use super::image::{CacheMode, CacheModeHint, ImageSource};
use crate::directio::DirectIoChecker;

/// Pick the cache mode for writing `dest`.
///
/// `TryNone` probes the destination: block devices as block devices,
/// anything else (including a file that does not exist yet) as a regular
/// file. Every other hint is plain writeback.
pub fn resolve_cache_mode(
    checker: &dyn DirectIoChecker,
    dest: &Path,
    hint: CacheModeHint,
) -> DiskportResult<CacheMode> {
    if hint != CacheModeHint::TryNone {
        return Ok(CacheMode::Writeback);
    }

    let is_block_device = match fs::metadata(dest) {
        Ok(meta) => meta.file_type().is_block_device(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            return Err(DiskportError::io(
                "cannot stat for establishing O_DIRECT support",
                e,
            ));
        }
    };

    let supported = if is_block_device {
        checker.check_block_device(dest)
    } else {
        checker.check_file(dest)
    }
    .map_err(|e| {
        DiskportError::io(
            format!("cannot establish O_DIRECT support for {}", dest.display()),
            e,
        )
    })?;

    let mode = if supported {
        CacheMode::Direct
    } else {
        CacheMode::Writeback
    };
    tracing::debug!(dest = %dest.display(), block_device = is_block_device, cache_mode = %mode, "Resolved cache mode");
    Ok(mode)
}

/// `convert -t <mode> -p -O raw <src> <dest>`
pub fn convert_args(cache_mode: CacheMode, source: &ImageSource, dest: &Path) -> Vec<String> {
    vec![
        "convert".to_string(),
        "-t".to_string(),
        cache_mode.as_str().to_string(),
        "-p".to_string(),
        "-O".to_string(),
        "raw".to_string(),
        source.as_str().to_string(),
        dest.display().to_string(),
    ]
}

/// Remove a partially written destination.
///
/// Block devices are left in place: the device node is not ours to delete.
pub fn remove_partial(dest: &Path) {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.file_type().is_block_device() => {
            tracing::debug!("Leaving block device {} in place", dest.display());
        }
        Ok(_) => {
            if let Err(e) = fs::remove_file(dest) {
                tracing::warn!("Failed to cleanup {}: {}", dest.display(), e);
            } else {
                tracing::debug!("Cleaned up partial image: {}", dest.display());
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to stat {} for cleanup: {}", dest.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Checker answering a fixed value and counting probes per kind.
    #[derive(Default)]
    struct CountingChecker {
        supported: bool,
        file_checks: AtomicUsize,
        block_checks: AtomicUsize,
    }

    impl DirectIoChecker for CountingChecker {
        fn check_file(&self, _path: &Path) -> io::Result<bool> {
            self.file_checks.fetch_add(1, Ordering::Relaxed);
            Ok(self.supported)
        }

        fn check_block_device(&self, _path: &Path) -> io::Result<bool> {
            self.block_checks.fetch_add(1, Ordering::Relaxed);
            Ok(self.supported)
        }
    }

    #[test]
    fn test_writeback_hint_never_probes() {
        let checker = CountingChecker {
            supported: true,
            ..Default::default()
        };
        let mode =
            resolve_cache_mode(&checker, Path::new("/data/disk.img"), CacheModeHint::Writeback)
                .unwrap();
        assert_eq!(mode, CacheMode::Writeback);
        assert_eq!(checker.file_checks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_missing_destination_probed_as_file() {
        let dir = TempDir::new().unwrap();
        let checker = CountingChecker {
            supported: true,
            ..Default::default()
        };
        let mode = resolve_cache_mode(
            &checker,
            &dir.path().join("disk.img"),
            CacheModeHint::TryNone,
        )
        .unwrap();
        assert_eq!(mode, CacheMode::Direct);
        assert_eq!(checker.file_checks.load(Ordering::Relaxed), 1);
        assert_eq!(checker.block_checks.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_unsupported_falls_back_to_writeback() {
        let dir = TempDir::new().unwrap();
        let checker = CountingChecker::default();
        let mode = resolve_cache_mode(
            &checker,
            &dir.path().join("disk.img"),
            CacheModeHint::TryNone,
        )
        .unwrap();
        assert_eq!(mode, CacheMode::Writeback);
    }

    #[test]
    fn test_convert_args() {
        let args = convert_args(
            CacheMode::Direct,
            &ImageSource::parse("nbd+unix:///?socket=/tmp/nbd.sock"),
            Path::new("/data/disk.img"),
        );
        assert_eq!(
            args,
            vec![
                "convert",
                "-t",
                "none",
                "-p",
                "-O",
                "raw",
                "nbd+unix:///?socket=/tmp/nbd.sock",
                "/data/disk.img",
            ]
        );
    }

    #[test]
    fn test_remove_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.img");
        std::fs::write(&path, b"partial").unwrap();

        remove_partial(&path);
        assert!(!path.exists());

        // Already gone is fine.
        remove_partial(&path);
    }
}
