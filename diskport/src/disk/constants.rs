//! qemu-img argument constants.
//!
//! Centralized location for the argument sets the engine passes to the
//! external tools. Their shape is dictated by the tools' CLIs.

/// Formats the importer accepts as conversion input.
pub const SUPPORTED_FORMATS: &[&str] = &["raw", "qcow2", "vmdk", "vdi", "vpc", "vhdx"];

/// Preallocation chains, fastest and most space-efficient first,
/// most portable last.
pub mod preallocation {
    /// `qemu-img convert`: fallocate, then full write, then zero-fill
    /// from offset 0 (`-S 0` disables sparse detection).
    pub const CONVERT: &[&[&str]] = &[
        &["-o", "preallocation=falloc"],
        &["-o", "preallocation=full"],
        &["-S", "0"],
    ];

    /// `qemu-img resize`: options must precede the image argument.
    pub const RESIZE: &[&[&str]] = &[&["--preallocation=falloc"], &["--preallocation=full"]];

    /// `qemu-img create`: appended after the positional arguments.
    pub const CREATE: &[&[&str]] = &[&["-o", "preallocation=falloc"], &["-o", "preallocation=full"]];
}

/// Output format requested from `qemu-img info`.
pub const INFO_OUTPUT_JSON: &str = "--output=json";

/// Zero source for block volume preallocation.
pub const DD_ZERO_SOURCE: &str = "if=/dev/zero";
