//! qemu-img backed implementation of [`ImageOperations`].

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use diskport_shared::constants::{schemes, storage};
use diskport_shared::errors::{DiskportError, DiskportResult, ProcessError};

use super::block;
use super::constants::{INFO_OUTPUT_JSON, preallocation as methods};
use super::convert;
use super::image::{CacheModeHint, ImageInfo, ImageSource};
use super::info;
use super::operations::ImageOperations;
use super::preallocation::{Placement, apply_with_fallback};
use super::size::SizeQuantity;
use crate::directio::{DirectIoChecker, OsDirectIo};
use crate::metrics::ProgressGauge;
use crate::process::{LimitedRunner, LineSink, ProcessLimits, ProcessRunner};
use crate::progress::ProgressReporter;
use crate::runtime::options::EngineOptions;

/// Import engine driving qemu-img and dd.
///
/// Constructed once from [`EngineOptions`]; holds the process runner, the
/// direct I/O prober and the progress reporter every operation uses.
pub struct QemuImg {
    options: EngineOptions,
    runner: Arc<dyn ProcessRunner>,
    direct_io: Arc<dyn DirectIoChecker>,
    progress: ProgressReporter,
}

impl QemuImg {
    /// Engine with the production runner and prober.
    pub fn new(options: EngineOptions, gauge: Arc<dyn ProgressGauge>) -> DiskportResult<Self> {
        Self::with_parts(
            options,
            Arc::new(LimitedRunner::new()),
            Arc::new(OsDirectIo::new()),
            gauge,
        )
    }

    /// Engine with caller-supplied runner and prober.
    pub fn with_parts(
        options: EngineOptions,
        runner: Arc<dyn ProcessRunner>,
        direct_io: Arc<dyn DirectIoChecker>,
        gauge: Arc<dyn ProgressGauge>,
    ) -> DiskportResult<Self> {
        options.validate()?;
        let progress = ProgressReporter::new(options.owner_uid.clone(), gauge);
        Ok(Self {
            options,
            runner,
            direct_io,
            progress,
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    fn run_qemu_img(
        &self,
        limits: Option<&ProcessLimits>,
        report_progress: bool,
        args: &[String],
    ) -> Result<Vec<u8>, ProcessError> {
        let program = self.options.qemu_img.to_string_lossy();
        let reporter = |line: &str| self.progress.on_line(line);
        let sink = report_progress.then_some(&reporter as &LineSink<'_>);
        tracing::debug!("Running qemu-img with args: {:?}", args);
        self.runner.run(limits, sink, &program, args)
    }

    /// Error context with the nbdkit log appended when it exists.
    fn with_nbdkit_log(&self, mut context: String) -> String {
        if let Ok(log) = fs::read_to_string(&self.options.nbdkit_log_path) {
            context.push(' ');
            context.push_str(&log);
        }
        context
    }

    fn exec_preallocation_block(
        &self,
        dest: &Path,
        pass: &block::ZeroFillPass,
    ) -> DiskportResult<()> {
        let direct = self.direct_io.check_block_device(dest).map_err(|e| {
            DiskportError::io(
                format!("cannot establish O_DIRECT support for {}", dest.display()),
                e,
            )
        })?;
        let args = block::dd_args(dest, pass, direct);
        let program = self.options.dd.to_string_lossy();

        self.runner
            .run(None, None, &program, &args)
            .map_err(|e| {
                DiskportError::tool(
                    format!(
                        "Could not preallocate blank block volume at {}, running dd for size {}, offset {}",
                        dest.display(),
                        pass.block_size * pass.count,
                        pass.offset
                    ),
                    e,
                )
            })?;
        Ok(())
    }
}

fn arg(value: &str) -> String {
    value.to_string()
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

impl ImageOperations for QemuImg {
    fn convert_to_raw_stream(
        &self,
        source: &ImageSource,
        dest: &Path,
        preallocate: bool,
        cache_mode: CacheModeHint,
    ) -> DiskportResult<()> {
        source.ensure_scheme(&[schemes::NBD_UNIX])?;

        let cache_mode = convert::resolve_cache_mode(self.direct_io.as_ref(), dest, cache_mode)?;
        let args = convert::convert_args(cache_mode, source, dest);
        tracing::info!(
            "Converting {} to raw at {} (cache mode {}, preallocate {})",
            source,
            dest.display(),
            cache_mode,
            preallocate
        );

        let result = if preallocate {
            apply_with_fallback(&args, methods::CONVERT, Placement::AfterSubcommand, |args| {
                self.run_qemu_img(None, true, args)
            })
        } else {
            self.run_qemu_img(None, true, &args)
        };

        if let Err(e) = result {
            convert::remove_partial(dest);
            let context = self.with_nbdkit_log("could not convert image to raw".to_string());
            return Err(DiskportError::tool(context, e));
        }

        tracing::info!("Converted {} to raw at {}", source, dest.display());
        Ok(())
    }

    fn resize(&self, image: &Path, size: &SizeQuantity, preallocate: bool) -> DiskportResult<()> {
        let args = vec![
            arg("resize"),
            arg("-f"),
            arg("raw"),
            path_arg(image),
            size.to_qemu_size(),
        ];
        tracing::info!("Resizing {} to {} (preallocate {})", image.display(), size, preallocate);

        let result = if preallocate {
            apply_with_fallback(&args, methods::RESIZE, Placement::AfterSubcommand, |args| {
                self.run_qemu_img(None, false, args)
            })
        } else {
            self.run_qemu_img(None, false, &args)
        };

        result
            .map(|_| ())
            .map_err(|e| DiskportError::tool(format!("Error resizing image {}", image.display()), e))
    }

    fn info(&self, source: &ImageSource) -> DiskportResult<ImageInfo> {
        source.ensure_scheme(&[schemes::NBD_UNIX, schemes::FILE])?;

        let args = vec![arg("info"), arg(INFO_OUTPUT_JSON), arg(source.as_str())];
        let output = self
            .run_qemu_img(Some(&self.options.info_limits), false, &args)
            .map_err(|e| {
                let context = format!("could not read image info for {}", source);
                let context = if source.is_nbd() {
                    self.with_nbdkit_log(context)
                } else {
                    context
                };
                DiskportError::tool(context, e)
            })?;

        info::parse_image_info(&output, source.as_str())
    }

    fn validate(&self, source: &ImageSource, available: i64) -> DiskportResult<()> {
        let image_info = self.info(source)?;
        tracing::debug!(
            image = %source,
            format = %image_info.format,
            virtual_size = image_info.virtual_size,
            available,
            "Validating image"
        );
        info::check_image_info(&image_info, available, source.as_str())
    }

    fn create_blank_image(
        &self,
        dest: &Path,
        size: &SizeQuantity,
        preallocate: bool,
    ) -> DiskportResult<()> {
        tracing::info!(
            "Creating raw image {} with size {}, preallocation {}",
            dest.display(),
            size,
            preallocate
        );
        let args = vec![
            arg("create"),
            arg("-f"),
            arg("raw"),
            path_arg(dest),
            size.to_qemu_size(),
        ];

        let result = if preallocate {
            apply_with_fallback(&args, methods::CREATE, Placement::Trailing, |args| {
                self.run_qemu_img(None, false, args)
            })
        } else {
            self.run_qemu_img(None, false, &args)
        };

        if let Err(e) = result {
            convert::remove_partial(dest);
            return Err(DiskportError::tool(
                format!(
                    "could not create raw image with size {} in {}",
                    size,
                    dest.display()
                ),
                e,
            ));
        }

        let permissions = fs::Permissions::from_mode(storage::BLANK_IMAGE_MODE);
        if let Err(e) = fs::set_permissions(dest, permissions) {
            convert::remove_partial(dest);
            return Err(DiskportError::io(
                "Unable to change permissions of target file",
                e,
            ));
        }

        Ok(())
    }

    fn rebase(&self, backing_file: &Path, delta: &Path) -> DiskportResult<()> {
        tracing::info!("Rebasing {} onto {}", delta.display(), backing_file.display());
        let args = vec![
            arg("rebase"),
            arg("-p"),
            arg("-u"),
            arg("-F"),
            arg("raw"),
            arg("-b"),
            path_arg(backing_file),
            path_arg(delta),
        ];
        self.run_qemu_img(None, true, &args).map_err(|e| {
            DiskportError::tool(
                format!(
                    "could not rebase {} onto {}",
                    delta.display(),
                    backing_file.display()
                ),
                e,
            )
        })?;
        Ok(())
    }

    fn commit(&self, image: &Path) -> DiskportResult<()> {
        tracing::info!("Committing {} to backing file", image.display());
        let args = vec![arg("commit"), arg("-p"), path_arg(image)];
        self.run_qemu_img(None, true, &args).map_err(|e| {
            DiskportError::tool(format!("could not commit {}", image.display()), e)
        })?;
        Ok(())
    }

    fn preallocate_blank_block(&self, dest: &Path, size: &SizeQuantity) -> DiskportResult<()> {
        tracing::info!("Preallocating block volume {} with size {}", dest.display(), size);
        let total = size.to_bytes()?;
        for pass in block::zero_fill_plan(total) {
            self.exec_preallocation_block(dest, &pass)?;
        }
        Ok(())
    }
}
