//! The image operation set exposed to import orchestration.

use std::path::Path;

use diskport_shared::errors::DiskportResult;

use super::image::{CacheModeHint, ImageInfo, ImageSource};
use super::size::SizeQuantity;

/// Image conversion, validation and allocation operations.
///
/// [`QemuImg`](super::QemuImg) is the production implementation; tests
/// substitute a fake. Every operation blocks until the underlying tools exit.
/// Callers serialize access to any single destination path.
pub trait ImageOperations: Send + Sync {
    /// Convert `source` to a raw image at `dest`.
    ///
    /// Accepts plain paths and `nbd+unix` sources. On failure `dest` is
    /// removed and the nbdkit log, when present, is appended to the error.
    fn convert_to_raw_stream(
        &self,
        source: &ImageSource,
        dest: &Path,
        preallocate: bool,
        cache_mode: CacheModeHint,
    ) -> DiskportResult<()>;

    /// Grow or shrink the raw image at `image` to exactly `size`.
    fn resize(&self, image: &Path, size: &SizeQuantity, preallocate: bool) -> DiskportResult<()>;

    /// Query structural metadata, always under resource limits.
    fn info(&self, source: &ImageSource) -> DiskportResult<ImageInfo>;

    /// [`info`](Self::info) followed by the import policy checks.
    fn validate(&self, source: &ImageSource, available: i64) -> DiskportResult<()>;

    /// Create a raw image of exactly `size` at `dest` with mode 0660.
    fn create_blank_image(
        &self,
        dest: &Path,
        size: &SizeQuantity,
        preallocate: bool,
    ) -> DiskportResult<()>;

    /// Point `delta` at the raw `backing_file` without copying data.
    fn rebase(&self, backing_file: &Path, delta: &Path) -> DiskportResult<()>;

    /// Flatten the changes of `image` into its backing file.
    fn commit(&self, image: &Path) -> DiskportResult<()>;

    /// Zero-fill the first `size` bytes of the block device at `dest`.
    fn preallocate_blank_block(&self, dest: &Path, size: &SizeQuantity) -> DiskportResult<()>;
}
