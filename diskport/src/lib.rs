//! Diskport - safe import of virtual machine disk images into raw volumes.
//!
//! The engine drives `qemu-img` (and `dd` for block volumes) to convert
//! untrusted images to raw format, validate them against storage policy,
//! preallocate destination space and maintain layered snapshots.
//!
//! - [`process`]: resource-limited child process execution
//! - [`directio`]: direct I/O capability probing
//! - [`disk`]: image model and the [`ImageOperations`] engine
//! - [`progress`]: conversion progress extraction
//! - [`metrics`]: per-owner progress metric storage
//! - [`runtime`]: engine options and constants
//! - [`util`]: logging setup

pub mod directio;
pub mod disk;
pub mod metrics;
pub mod process;
pub mod progress;
pub mod runtime;
pub mod util;

pub use diskport_shared::errors::{DiskportError, DiskportResult, ProcessError};
pub use directio::{DirectIoChecker, OsDirectIo};
pub use disk::{
    CacheMode, CacheModeHint, ImageFormat, ImageInfo, ImageOperations, ImageSource, QemuImg,
    SizeQuantity,
};
pub use metrics::{ProgressGauge, ProgressMetrics, ProgressMetricsStorage};
pub use process::{LimitedRunner, LineSink, ProcessLimits, ProcessRunner};
pub use progress::ProgressReporter;
pub use runtime::options::EngineOptions;
