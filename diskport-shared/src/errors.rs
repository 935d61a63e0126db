//! Hierarchical error types for disk image import.
//!
//! Errors are categorized by how a caller reacts to them:
//! - Invalid input ([`DiskportError::UnsupportedScheme`],
//!   [`DiskportError::UnsupportedFormat`], [`DiskportError::InvalidBackingFile`]):
//!   fail fast, never retried.
//! - Capacity ([`DiskportError::LargerVolumeRequired`]): the caller may ask
//!   for a bigger volume.
//! - Tool failure ([`DiskportError::Tool`], [`DiskportError::InvalidImageInfo`]):
//!   wrapped with operation context.
//! - [`ProcessError`]: the process guard's own view of a failed child,
//!   keeping "killed for exceeding limits" apart from "exited non-zero".

use std::io;
use thiserror::Error;

/// Result alias used throughout diskport.
pub type DiskportResult<T> = Result<T, DiskportError>;

// ============================================================================
// Top-Level Error
// ============================================================================

/// Errors that can occur during image import operations.
///
/// ```ignore
/// match ops.validate(&source, available) {
///     Err(e) if e.is_larger_volume_required() => { /* request more storage */ }
///     Err(DiskportError::UnsupportedFormat { .. }) => { /* reject image */ }
///     Err(e) => return Err(e),
///     Ok(()) => {}
/// }
/// ```
#[derive(Debug, Error)]
pub enum DiskportError {
    /// Source locator uses a scheme the operation does not accept.
    #[error("not valid schema {scheme}")]
    UnsupportedScheme { scheme: String },

    /// Image format is outside the supported set.
    #[error("Invalid format {format} for image {image}")]
    UnsupportedFormat { format: String, image: String },

    /// Image references a backing file that does not exist locally.
    #[error("Image {image} is invalid because it has invalid backing file {backing_file}")]
    InvalidBackingFile { image: String, backing_file: String },

    /// Destination is smaller than the image's declared virtual size.
    #[error(
        "virtual image size {virtual_size} is larger than the reported available storage {available}. A larger volume is required"
    )]
    LargerVolumeRequired { virtual_size: i64, available: i64 },

    /// Structured output of the introspection call could not be parsed.
    #[error("Invalid json for image {image}: {source}")]
    InvalidImageInfo {
        image: String,
        output: String,
        #[source]
        source: serde_json::Error,
    },

    /// External tool failed (non-zero exit, limit kill, spawn failure).
    #[error("{context}: {source}")]
    Tool {
        context: String,
        #[source]
        source: ProcessError,
    },

    /// Filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Size quantity could not be parsed or rendered.
    #[error("invalid size quantity {0:?}")]
    InvalidSize(String),

    /// Engine configuration is unusable.
    #[error("config: {0}")]
    Config(String),
}

// ============================================================================
// Process Errors (process guard)
// ============================================================================

/// Errors reported by the process guard for a single child process.
///
/// `Exited` and `LimitExceeded` keep whatever the child printed so callers
/// can look for specific diagnostics.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The child could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The tool ran and reported failure.
    #[error("{program} exited with status {code}: {}", .stderr.trim())]
    Exited {
        program: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// The kernel killed the tool for exceeding its CPU or memory bounds.
    #[error("{program} killed by signal {signal} after exceeding resource limits")]
    LimitExceeded {
        program: String,
        signal: i32,
        stdout: String,
        stderr: String,
    },

    /// The tool was terminated by a signal unrelated to its limits.
    #[error("{program} terminated by signal {signal}")]
    Signaled { program: String, signal: i32 },

    /// Reading the child's pipes or waiting on it failed.
    #[error("{program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// Create a spawn error.
    pub fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Create a pipe/wait I/O error.
    pub fn io(program: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            program: program.into(),
            source,
        }
    }

    /// True when the child was killed for exceeding its resource limits.
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::LimitExceeded { .. })
    }

    /// Whether the child's captured stdout or stderr contains `needle`.
    pub fn output_contains(&self, needle: &str) -> bool {
        match self {
            Self::Exited { stdout, stderr, .. } | Self::LimitExceeded { stdout, stderr, .. } => {
                stdout.contains(needle) || stderr.contains(needle)
            }
            _ => false,
        }
    }
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl DiskportError {
    /// Wrap a process failure with operation context.
    pub fn tool(context: impl Into<String>, source: ProcessError) -> Self {
        Self::Tool {
            context: context.into(),
            source,
        }
    }

    /// Wrap an I/O failure with operation context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True for the distinguished "larger volume required" capacity error.
    pub fn is_larger_volume_required(&self) -> bool {
        matches!(self, Self::LargerVolumeRequired { .. })
    }

    /// True when an underlying tool was killed for exceeding resource limits.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::Tool { source, .. } if source.is_limit_exceeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(stderr: &str) -> ProcessError {
        ProcessError::Exited {
            program: "qemu-img".into(),
            code: 1,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn test_larger_volume_required_is_distinguished() {
        let err = DiskportError::LargerVolumeRequired {
            virtual_size: 2048,
            available: 1024,
        };
        assert!(err.is_larger_volume_required());
        assert!(err.to_string().contains("larger volume is required"));

        let err = DiskportError::UnsupportedFormat {
            format: "iso".into(),
            image: "/data/disk.img".into(),
        };
        assert!(!err.is_larger_volume_required());
    }

    #[test]
    fn test_limit_exceeded_is_distinguishable_from_exit() {
        let killed = DiskportError::tool(
            "could not read image info",
            ProcessError::LimitExceeded {
                program: "qemu-img".into(),
                signal: 24, // SIGXCPU
                stdout: String::new(),
                stderr: String::new(),
            },
        );
        assert!(killed.is_resource_limit());

        let refused = DiskportError::tool("could not read image info", exited("bad header"));
        assert!(!refused.is_resource_limit());
    }

    #[test]
    fn test_output_contains_searches_both_streams() {
        let err = ProcessError::Exited {
            program: "qemu-img".into(),
            code: 1,
            stdout: "    (0.00/100%)".into(),
            stderr: "qemu-img: Unsupported preallocation mode 'falloc'".into(),
        };
        assert!(err.output_contains("Unsupported preallocation mode"));
        assert!(err.output_contains("(0.00/100%)"));
        assert!(!err.output_contains("No space left"));

        let spawn = ProcessError::spawn("qemu-img", io::Error::other("missing"));
        assert!(!spawn.output_contains("missing"));
    }

    #[test]
    fn test_error_display() {
        let err = DiskportError::tool("Error resizing image /data/disk.img", exited("  boom \n"));
        assert_eq!(
            err.to_string(),
            "Error resizing image /data/disk.img: qemu-img exited with status 1: boom"
        );

        let err = DiskportError::UnsupportedScheme {
            scheme: "ftp".into(),
        };
        assert_eq!(err.to_string(), "not valid schema ftp");
    }
}
