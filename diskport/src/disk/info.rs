//! Image introspection output parsing and validation policy.

use std::path::Path;

use diskport_shared::errors::{DiskportError, DiskportResult};

use super::image::ImageInfo;

/// Parse `qemu-img info --output=json` output.
///
/// Malformed output is reported with the raw bytes attached; nothing is
/// defaulted or coerced.
pub fn parse_image_info(output: &[u8], image: &str) -> DiskportResult<ImageInfo> {
    serde_json::from_slice(output).map_err(|source| {
        let output = String::from_utf8_lossy(output).into_owned();
        tracing::error!("Invalid JSON:\n{}\n", output);
        DiskportError::InvalidImageInfo {
            image: image.to_string(),
            output,
            source,
        }
    })
}

/// Check image metadata against import policy.
///
/// In order: supported format, resolvable backing file, enough space.
/// `available == virtual_size` passes.
pub fn check_image_info(info: &ImageInfo, available: i64, image: &str) -> DiskportResult<()> {
    if !info.format.is_supported() {
        return Err(DiskportError::UnsupportedFormat {
            format: info.format.to_string(),
            image: image.to_string(),
        });
    }

    if let Some(backing_file) = &info.backing_file
        && !backing_file_exists(backing_file)
    {
        return Err(DiskportError::InvalidBackingFile {
            image: image.to_string(),
            backing_file: backing_file.display().to_string(),
        });
    }

    if available < info.virtual_size {
        return Err(DiskportError::LargerVolumeRequired {
            virtual_size: info.virtual_size,
            available,
        });
    }

    Ok(())
}

fn backing_file_exists(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}
