//! Image model: formats, structural metadata, source locators, cache modes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use diskport_shared::constants::schemes;
use diskport_shared::errors::{DiskportError, DiskportResult};
use serde::{Deserialize, Deserializer, Serialize};

use super::constants::SUPPORTED_FORMATS;

/// Disk image format as reported by `qemu-img info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageFormat {
    /// Raw image, no on-disk metadata.
    Raw,
    /// QCOW2 (QEMU Copy-On-Write v2).
    Qcow2,
    /// VMware disk.
    Vmdk,
    /// VirtualBox disk.
    Vdi,
    /// Virtual PC / VHD.
    Vpc,
    /// Hyper-V VHDX.
    Vhdx,
    /// Any format outside the supported set.
    Other(String),
}

impl ImageFormat {
    /// Get string representation of this format.
    pub fn as_str(&self) -> &str {
        match self {
            ImageFormat::Raw => "raw",
            ImageFormat::Qcow2 => "qcow2",
            ImageFormat::Vmdk => "vmdk",
            ImageFormat::Vdi => "vdi",
            ImageFormat::Vpc => "vpc",
            ImageFormat::Vhdx => "vhdx",
            ImageFormat::Other(name) => name,
        }
    }

    /// Whether the importer accepts this format.
    pub fn is_supported(&self) -> bool {
        SUPPORTED_FORMATS.contains(&self.as_str())
    }
}

impl From<String> for ImageFormat {
    fn from(value: String) -> Self {
        match value.as_str() {
            "raw" => ImageFormat::Raw,
            "qcow2" => ImageFormat::Qcow2,
            "vmdk" => ImageFormat::Vmdk,
            "vdi" => ImageFormat::Vdi,
            "vpc" => ImageFormat::Vpc,
            "vhdx" => ImageFormat::Vhdx,
            _ => ImageFormat::Other(value),
        }
    }
}

impl From<ImageFormat> for String {
    fn from(format: ImageFormat) -> Self {
        format.as_str().to_string()
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural metadata of an image, parsed from `qemu-img info --output=json`.
///
/// Recomputed on every query, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageInfo {
    /// Format of the image.
    pub format: ImageFormat,

    /// Backing file of a layered image.
    #[serde(
        rename = "backing-filename",
        default,
        deserialize_with = "empty_path_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub backing_file: Option<PathBuf>,

    /// Size of the disk as seen by the guest.
    pub virtual_size: i64,

    /// Bytes the image occupies on its storage (absent for network exports).
    #[serde(default)]
    pub actual_size: i64,
}

fn empty_path_as_none<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()).map(PathBuf::from))
}

/// Where an image is read from: a local path or a URL.
///
/// Only the scheme is interpreted; the locator is otherwise passed to
/// qemu-img verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    locator: String,
    scheme: Option<String>,
}

impl ImageSource {
    /// Parse a locator such as `/data/disk.img`, `file:///data/disk.img`
    /// or `nbd+unix:///?socket=/tmp/nbdkit.sock`.
    pub fn parse(locator: impl Into<String>) -> Self {
        let locator = locator.into();
        let scheme = parse_scheme(&locator).map(str::to_ascii_lowercase);
        Self { locator, scheme }
    }

    /// Source for a local file.
    pub fn local(path: impl AsRef<Path>) -> Self {
        Self {
            locator: path.as_ref().to_string_lossy().into_owned(),
            scheme: None,
        }
    }

    /// URL scheme, `None` for plain paths.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// The locator as passed to qemu-img.
    pub fn as_str(&self) -> &str {
        &self.locator
    }

    /// Whether the image is served by the nbdkit export helper.
    pub fn is_nbd(&self) -> bool {
        self.scheme() == Some(schemes::NBD_UNIX)
    }

    /// Fail unless the source is a plain path or uses one of `allowed`.
    pub fn ensure_scheme(&self, allowed: &[&str]) -> DiskportResult<()> {
        match self.scheme() {
            None => Ok(()),
            Some(scheme) if allowed.contains(&scheme) => Ok(()),
            Some(scheme) => Err(DiskportError::UnsupportedScheme {
                scheme: scheme.to_string(),
            }),
        }
    }
}

/// RFC 3986 scheme: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"
fn parse_scheme(locator: &str) -> Option<&str> {
    let (scheme, _) = locator.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    let valid = first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

impl FromStr for ImageSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.locator)
    }
}

/// Write cache mode passed to `qemu-img convert -t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Buffered writes through the host page cache.
    Writeback,
    /// Direct I/O, bypassing the page cache (qemu-img's `none`).
    Direct,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Writeback => "writeback",
            CacheMode::Direct => "none",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller's request for cache mode selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheModeHint {
    /// Use direct I/O when the destination supports it.
    TryNone,
    /// Always write through the page cache.
    #[default]
    Writeback,
}

impl From<&str> for CacheModeHint {
    fn from(value: &str) -> Self {
        if value == "TryNone" {
            CacheModeHint::TryNone
        } else {
            CacheModeHint::Writeback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip_and_support() {
        for name in SUPPORTED_FORMATS {
            let format = ImageFormat::from(name.to_string());
            assert!(format.is_supported(), "{name} should be supported");
            assert_eq!(format.as_str(), *name);
        }

        let iso = ImageFormat::from("iso".to_string());
        assert_eq!(iso, ImageFormat::Other("iso".into()));
        assert!(!iso.is_supported());
    }

    #[test]
    fn test_info_deserialize_full() {
        let json = r#"{
            "virtual-size": 10737418240,
            "filename": "disk.qcow2",
            "cluster-size": 65536,
            "format": "qcow2",
            "actual-size": 200704,
            "backing-filename": "/data/base.img",
            "dirty-flag": false
        }"#;
        let info: ImageInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.format, ImageFormat::Qcow2);
        assert_eq!(info.virtual_size, 10737418240);
        assert_eq!(info.actual_size, 200704);
        assert_eq!(info.backing_file, Some(PathBuf::from("/data/base.img")));
    }

    #[test]
    fn test_info_empty_backing_file_is_none() {
        let json = r#"{"format": "raw", "virtual-size": 1024, "backing-filename": ""}"#;
        let info: ImageInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.backing_file, None);
        assert_eq!(info.actual_size, 0);
    }

    #[test]
    fn test_info_missing_virtual_size_is_error() {
        assert!(serde_json::from_str::<ImageInfo>(r#"{"format": "raw"}"#).is_err());
    }

    #[test]
    fn test_source_schemes() {
        assert_eq!(ImageSource::parse("/data/disk.img").scheme(), None);
        assert_eq!(ImageSource::parse("disk.img").scheme(), None);
        assert_eq!(
            ImageSource::parse("nbd+unix:///?socket=/tmp/nbd.sock").scheme(),
            Some("nbd+unix")
        );
        assert!(ImageSource::parse("nbd+unix:///?socket=/tmp/nbd.sock").is_nbd());
        assert_eq!(ImageSource::parse("file:///data/disk.img").scheme(), Some("file"));
        assert_eq!(ImageSource::parse("FTP://host/disk.img").scheme(), Some("ftp"));
        assert_eq!(ImageSource::parse("./a:b").scheme(), None);
        assert_eq!(ImageSource::local("/data/a:b.img").scheme(), None);
    }

    #[test]
    fn test_ensure_scheme() {
        let allowed = [schemes::NBD_UNIX];
        assert!(ImageSource::parse("/data/disk.img").ensure_scheme(&allowed).is_ok());
        assert!(
            ImageSource::parse("nbd+unix:///?socket=/s")
                .ensure_scheme(&allowed)
                .is_ok()
        );

        let err = ImageSource::parse("ftp://host/disk.img")
            .ensure_scheme(&allowed)
            .unwrap_err();
        assert!(matches!(err, DiskportError::UnsupportedScheme { scheme } if scheme == "ftp"));
    }

    #[test]
    fn test_cache_mode_hint_from_str() {
        assert_eq!(CacheModeHint::from("TryNone"), CacheModeHint::TryNone);
        assert_eq!(CacheModeHint::from("writethrough"), CacheModeHint::Writeback);
        assert_eq!(CacheModeHint::from(""), CacheModeHint::Writeback);
        assert_eq!(CacheMode::Direct.as_str(), "none");
    }
}
