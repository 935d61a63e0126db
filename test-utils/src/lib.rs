//! Test doubles shared by the diskport test suites.
//!
//! - [`ScriptedRunner`]: replays queued tool results and records invocations
//! - [`FixedDirectIo`]: direct I/O prober with a fixed answer
//! - [`FakeImageOperations`]: in-memory [`ImageOperations`] for orchestration tests
//! - [`EngineFixture`]: a [`QemuImg`] wired to the doubles inside a temp dir

use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use diskport::{
    CacheModeHint, DirectIoChecker, EngineOptions, ImageInfo, ImageOperations, ImageSource,
    LineSink, ProcessLimits, ProcessRunner, ProgressMetrics, ProgressMetricsStorage, QemuImg,
    SizeQuantity,
};
use diskport::disk::check_image_info;
use diskport_shared::constants::signatures::UNSUPPORTED_PREALLOCATION;
use diskport_shared::errors::{DiskportError, DiskportResult, ProcessError};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Owner key the fixture engine publishes progress under.
pub const TEST_OWNER: &str = "import-job-1";

// ============================================================================
// PROCESS RUNNER
// ============================================================================

type Action = Box<dyn Fn(&[String]) + Send + Sync>;

/// One scripted tool run.
pub struct Step {
    lines: Vec<String>,
    result: Result<Vec<u8>, ProcessError>,
    action: Option<Action>,
}

impl Step {
    /// Exit 0 with empty stdout.
    pub fn ok() -> Self {
        Self::stdout(Vec::new())
    }

    /// Exit 0 with `stdout`.
    pub fn stdout(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            lines: Vec::new(),
            result: Ok(stdout.into()),
            action: None,
        }
    }

    /// Fail with `err`.
    pub fn fail(err: ProcessError) -> Self {
        Self {
            lines: Vec::new(),
            result: Err(err),
            action: None,
        }
    }

    /// Lines fed to the sink before the step completes.
    pub fn with_lines(mut self, lines: &[&str]) -> Self {
        self.lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Side effect run with the invocation's arguments, e.g. creating the
    /// destination file the real tool would have written.
    pub fn with_action(mut self, action: impl Fn(&[String]) + Send + Sync + 'static) -> Self {
        self.action = Some(Box::new(action));
        self
    }
}

/// A recorded tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub limits: Option<ProcessLimits>,
    pub had_sink: bool,
}

/// [`ProcessRunner`] that replays queued steps.
///
/// Once the queue is empty every run succeeds with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a step.
    pub fn push(&self, step: Step) -> &Self {
        self.steps.lock().push_back(step);
        self
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Arguments of invocation `index`.
    pub fn args(&self, index: usize) -> Vec<String> {
        self.calls.lock()[index].args.clone()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(
        &self,
        limits: Option<&ProcessLimits>,
        sink: Option<&LineSink<'_>>,
        program: &str,
        args: &[String],
    ) -> Result<Vec<u8>, ProcessError> {
        self.calls.lock().push(Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            limits: limits.cloned(),
            had_sink: sink.is_some(),
        });

        let Some(step) = self.steps.lock().pop_front() else {
            return Ok(Vec::new());
        };

        if let Some(sink) = sink {
            for line in &step.lines {
                sink(line);
            }
        }
        if let Some(action) = &step.action {
            action(args);
        }
        step.result
    }
}

/// qemu-img's answer when the filesystem lacks a preallocation mode.
pub fn unsupported_preallocation(mode: &str) -> ProcessError {
    exited(&format!("qemu-img: {} '{}'", UNSUPPORTED_PREALLOCATION, mode))
}

/// Exit status 1 with `stderr`.
pub fn exited(stderr: &str) -> ProcessError {
    ProcessError::Exited {
        program: "qemu-img".to_string(),
        code: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Killed by SIGXCPU under a CPU limit.
pub fn cpu_limit_exceeded() -> ProcessError {
    ProcessError::LimitExceeded {
        program: "qemu-img".to_string(),
        signal: libc::SIGXCPU,
        stdout: String::new(),
        stderr: String::new(),
    }
}

/// `qemu-img info --output=json` document.
pub fn info_json(format: &str, virtual_size: i64, backing_file: Option<&Path>) -> String {
    let backing = backing_file
        .map(|p| format!(r#", "backing-filename": "{}""#, p.display()))
        .unwrap_or_default();
    format!(
        r#"{{"virtual-size": {virtual_size}, "filename": "disk", "format": "{format}", "actual-size": 4096, "dirty-flag": false{backing}}}"#
    )
}

/// Action creating the last argument (the destination) as an empty file.
pub fn touch_last_arg() -> impl Fn(&[String]) + Send + Sync + 'static {
    |args: &[String]| {
        if let Some(dest) = args.last() {
            let _ = std::fs::write(dest, b"partial");
        }
    }
}

// ============================================================================
// DIRECT I/O
// ============================================================================

/// [`DirectIoChecker`] with a fixed answer that counts probes.
#[derive(Debug, Default)]
pub struct FixedDirectIo {
    supported: bool,
    file_probes: AtomicUsize,
    block_probes: AtomicUsize,
}

impl FixedDirectIo {
    pub fn new(supported: bool) -> Self {
        Self {
            supported,
            ..Default::default()
        }
    }

    pub fn file_probes(&self) -> usize {
        self.file_probes.load(Ordering::SeqCst)
    }

    pub fn block_probes(&self) -> usize {
        self.block_probes.load(Ordering::SeqCst)
    }
}

impl DirectIoChecker for FixedDirectIo {
    fn check_file(&self, _path: &Path) -> io::Result<bool> {
        self.file_probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.supported)
    }

    fn check_block_device(&self, _path: &Path) -> io::Result<bool> {
        self.block_probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.supported)
    }
}

// ============================================================================
// ENGINE FIXTURE
// ============================================================================

/// [`QemuImg`] backed by a [`ScriptedRunner`] in an isolated temp dir.
pub struct EngineFixture {
    pub engine: QemuImg,
    pub runner: Arc<ScriptedRunner>,
    pub direct_io: Arc<FixedDirectIo>,
    pub metrics: ProgressMetrics,
    pub options: EngineOptions,
    temp_dir: TempDir,
}

impl EngineFixture {
    /// Fixture whose direct I/O probes answer `direct_io`.
    pub fn new(direct_io: bool) -> Self {
        Self::with_options(direct_io, |_| {})
    }

    /// Fixture with `configure` applied to the default test options.
    pub fn with_options(direct_io: bool, configure: impl FnOnce(&mut EngineOptions)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut options = EngineOptions {
            owner_uid: Some(TEST_OWNER.to_string()),
            nbdkit_log_path: temp_dir.path().join("nbdkit.log"),
            ..Default::default()
        };
        configure(&mut options);

        let runner = Arc::new(ScriptedRunner::new());
        let direct_io = Arc::new(FixedDirectIo::new(direct_io));
        let storage = ProgressMetricsStorage::new();
        let metrics = storage.handle();
        let engine = QemuImg::with_parts(
            options.clone(),
            runner.clone(),
            direct_io.clone(),
            Arc::new(storage),
        )
        .expect("Failed to create engine");

        Self {
            engine,
            runner,
            direct_io,
            metrics,
            options,
            temp_dir,
        }
    }

    /// Path inside the fixture's temp dir.
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Progress published for [`TEST_OWNER`].
    pub fn progress(&self) -> f64 {
        self.metrics.progress(TEST_OWNER)
    }
}

// ============================================================================
// IMAGE OPERATIONS
// ============================================================================

/// In-memory [`ImageOperations`].
///
/// Records each operation by name. `info` answers with the configured
/// metadata and `validate` applies the real policy checks to it. Operations
/// named in [`fail`](Self::fail) return a tool error instead.
#[derive(Default)]
pub struct FakeImageOperations {
    info: Mutex<Option<ImageInfo>>,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<String>>,
}

impl FakeImageOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata returned by `info`.
    pub fn with_info(self, info: ImageInfo) -> Self {
        *self.info.lock() = Some(info);
        self
    }

    /// Make `operation` fail from now on.
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, operation: &'static str, detail: String) -> DiskportResult<()> {
        self.calls.lock().push(format!("{operation} {detail}"));
        if self.failing.lock().contains(operation) {
            return Err(DiskportError::tool(
                format!("{operation} failed"),
                exited("scripted failure"),
            ));
        }
        Ok(())
    }
}

impl ImageOperations for FakeImageOperations {
    fn convert_to_raw_stream(
        &self,
        source: &ImageSource,
        dest: &Path,
        preallocate: bool,
        cache_mode: CacheModeHint,
    ) -> DiskportResult<()> {
        self.record(
            "convert",
            format!("{} {} {} {:?}", source, dest.display(), preallocate, cache_mode),
        )
    }

    fn resize(&self, image: &Path, size: &SizeQuantity, preallocate: bool) -> DiskportResult<()> {
        self.record("resize", format!("{} {} {}", image.display(), size, preallocate))
    }

    fn info(&self, source: &ImageSource) -> DiskportResult<ImageInfo> {
        self.record("info", source.to_string())?;
        self.info.lock().clone().ok_or_else(|| {
            DiskportError::tool(
                format!("could not read image info for {source}"),
                exited("no metadata configured"),
            )
        })
    }

    fn validate(&self, source: &ImageSource, available: i64) -> DiskportResult<()> {
        let info = self.info(source)?;
        check_image_info(&info, available, source.as_str())
    }

    fn create_blank_image(
        &self,
        dest: &Path,
        size: &SizeQuantity,
        preallocate: bool,
    ) -> DiskportResult<()> {
        self.record("create", format!("{} {} {}", dest.display(), size, preallocate))
    }

    fn rebase(&self, backing_file: &Path, delta: &Path) -> DiskportResult<()> {
        self.record("rebase", format!("{} {}", backing_file.display(), delta.display()))
    }

    fn commit(&self, image: &Path) -> DiskportResult<()> {
        self.record("commit", image.display().to_string())
    }

    fn preallocate_blank_block(&self, dest: &Path, size: &SizeQuantity) -> DiskportResult<()> {
        self.record("preallocate_block", format!("{} {}", dest.display(), size))
    }
}
