//! Shared constants between the engine and its test doubles
//!
//! Values here describe contracts with external tools and the surrounding
//! importer process, so they must not drift between the two sides.

/// Environment variables read by the engine at startup.
pub mod envs {
    /// Identifier of the import job owning this process (progress metric key).
    pub const OWNER_UID: &str = "OWNER_UID";
}

/// External tools invoked through the process guard.
pub mod tools {
    /// Image conversion/introspection tool.
    pub const QEMU_IMG: &str = "qemu-img";

    /// Zero-fill tool used for block volume preallocation.
    pub const DD: &str = "dd";
}

/// Well-known filesystem paths.
pub mod paths {
    /// Log written by the nbdkit export helper serving `nbd+unix` sources.
    pub const NBDKIT_LOG: &str = "/tmp/nbdkit.log";
}

/// Source locator schemes.
pub mod schemes {
    /// Network block device served over a unix socket.
    pub const NBD_UNIX: &str = "nbd+unix";

    /// Plain local file URL (accepted by introspection only).
    pub const FILE: &str = "file";
}

/// Fixed fragments of qemu-img output the engine keys decisions on.
pub mod signatures {
    /// Emitted when the host filesystem rejects a preallocation mode.
    pub const UNSUPPORTED_PREALLOCATION: &str = "Unsupported preallocation mode";

    /// Progress token printed by `-p`, e.g. `(45.34/100%)`.
    pub const PROGRESS_PATTERN: &str = r"\((\d?\d\.\d\d)/100%\)";
}

/// Resource bounds for parsing untrusted image headers.
pub mod limits {
    /// Address space cap for `qemu-img info` (1 GiB, same as OpenStack Nova).
    pub const INFO_MAX_MEMORY: u64 = 1 << 30;

    /// CPU time cap for `qemu-img info` in seconds (same as OpenStack Nova).
    pub const INFO_MAX_CPU_SECS: u64 = 30;
}

/// Storage sizing.
pub mod storage {
    /// Chunk size used when zero-filling block volumes.
    pub const MIB: i64 = 1024 * 1024;

    /// Mode applied to freshly created blank images (owner/group writable).
    pub const BLANK_IMAGE_MODE: u32 = 0o660;
}
