//! Process guard: runs external image tools under resource limits.
//!
//! Every tool invocation in diskport goes through a [`ProcessRunner`]. The
//! production [`LimitedRunner`] spawns the tool, applies CPU/address-space
//! rlimits in a `pre_exec` hook, streams stdout lines to an optional sink
//! and classifies how the child ended:
//!
//! - exit status 0: `Ok(stdout)`
//! - non-zero exit: [`ProcessError::Exited`]
//! - killed by the signal that enforces a configured limit:
//!   [`ProcessError::LimitExceeded`]
//! - killed by anything else: [`ProcessError::Signaled`]

mod config;
mod output;
mod pre_exec;
mod rlimit;

pub use config::ProcessLimits;

use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use diskport_shared::errors::ProcessError;

/// Receives each output line of a running tool.
pub type LineSink<'a> = dyn Fn(&str) + Sync + 'a;

/// Executes external tools on behalf of the engine.
///
/// Implementations must block until the tool has exited and both of its
/// output streams are drained.
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`.
    ///
    /// # Arguments
    /// * `limits` - rlimits for the child, or `None` to run unbounded
    /// * `sink` - called for every stdout line as it is produced; stderr is
    ///   captured and logged only, since it echoes untrusted image metadata
    /// * `program` - tool name or path
    /// * `args` - argument list, passed verbatim
    ///
    /// # Returns
    /// * `Ok(stdout)` - the tool exited with status 0
    /// * `Err(...)` - spawn failure, non-zero exit or limit kill
    fn run(
        &self,
        limits: Option<&ProcessLimits>,
        sink: Option<&LineSink<'_>>,
        program: &str,
        args: &[String],
    ) -> Result<Vec<u8>, ProcessError>;
}

/// Production runner backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LimitedRunner;

impl LimitedRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessRunner for LimitedRunner {
    fn run(
        &self,
        limits: Option<&ProcessLimits>,
        sink: Option<&LineSink<'_>>,
        program: &str,
        args: &[String],
    ) -> Result<Vec<u8>, ProcessError> {
        tracing::debug!(program, ?args, ?limits, "Running tool");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(limits) = limits {
            pre_exec::add_pre_exec_hook(&mut cmd, limits.clone());
        }

        let mut child = cmd.spawn().map_err(|e| ProcessError::spawn(program, e))?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::io(
                program,
                std::io::Error::other("child pipes were not captured"),
            ));
        };

        let (status, stdout, stderr) = thread::scope(|scope| {
            let collectors = output::spawn_collector(scope, stdout, "stdout", sink).and_then(
                |out| output::spawn_collector(scope, stderr, "stderr", None).map(|err| (out, err)),
            );
            let (out, err) = match collectors {
                Ok(handles) => handles,
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProcessError::io(program, e));
                }
            };

            let status = child.wait().map_err(|e| ProcessError::io(program, e));
            let stdout = output::join(out).map_err(|e| ProcessError::io(program, e));
            let stderr = output::join(err).map_err(|e| ProcessError::io(program, e));
            Ok((status?, stdout?, stderr?))
        })?;

        classify(program, limits, status, stdout, stderr)
    }
}

fn classify(
    program: &str,
    limits: Option<&ProcessLimits>,
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
) -> Result<Vec<u8>, ProcessError> {
    if status.success() {
        return Ok(stdout);
    }

    let program = program.to_string();
    if let Some(code) = status.code() {
        tracing::debug!(%program, code, "Tool exited with failure");
        return Err(ProcessError::Exited {
            program,
            code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        });
    }

    let signal = status.signal().unwrap_or_default();
    if limits.is_some_and(|l| l.is_enforcement_signal(signal)) {
        tracing::warn!(%program, signal, "Tool killed after exceeding resource limits");
        return Err(ProcessError::LimitExceeded {
            program,
            signal,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        });
    }

    Err(ProcessError::Signaled { program, signal })
}
