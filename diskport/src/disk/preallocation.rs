//! Preallocation with fallback.
//!
//! Storage backends differ in which preallocation primitive their
//! filesystem supports. Methods are tried in chain order; a method is
//! skipped only when qemu-img reports the mode as unsupported. Any other
//! failure ends the chain.
//!
//! NOTE: the unsupported-mode check matches qemu-img's message text, the
//! only signal the tool provides. A localized or reworded message would
//! stop the fallback at the first method.

use diskport_shared::constants::signatures::UNSUPPORTED_PREALLOCATION;
use diskport_shared::errors::ProcessError;

/// Where a method's flags go in the argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Right after the subcommand token. Some subcommands (resize) require
    /// preallocation options before any other argument.
    AfterSubcommand,
    /// After every other argument.
    Trailing,
}

/// Build the argument list for one method.
pub fn with_method(base_args: &[String], method: &[&str], placement: Placement) -> Vec<String> {
    let method = method.iter().map(|arg| arg.to_string());
    match (placement, base_args.split_first()) {
        (Placement::AfterSubcommand, Some((subcommand, rest))) => std::iter::once(subcommand.clone())
            .chain(method)
            .chain(rest.iter().cloned())
            .collect(),
        _ => base_args.iter().cloned().chain(method).collect(),
    }
}

/// Run `run` with each method of `methods` until one succeeds.
///
/// # Returns
/// * `Ok(output)` - first method that succeeded; later methods are not tried
/// * `Err(...)` - the first failure that is not "unsupported mode", or the
///   last failure once the chain is exhausted
///
/// An empty chain runs `base_args` unchanged.
pub fn apply_with_fallback<T, F>(
    base_args: &[String],
    methods: &[&[&str]],
    placement: Placement,
    mut run: F,
) -> Result<T, ProcessError>
where
    F: FnMut(&[String]) -> Result<T, ProcessError>,
{
    let mut last_err = None;

    for method in methods {
        let args = with_method(base_args, method, placement);
        tracing::debug!(?method, ?args, "Attempting preallocation method");

        match run(&args) {
            Ok(output) => return Ok(output),
            Err(e) if e.output_contains(UNSUPPORTED_PREALLOCATION) => {
                tracing::debug!(?method, "Unsupported preallocation mode. Retrying");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => run(base_args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::constants::preallocation;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn unsupported() -> ProcessError {
        ProcessError::Exited {
            program: "qemu-img".into(),
            code: 1,
            stdout: String::new(),
            stderr: "qemu-img: Unsupported preallocation mode 'falloc'".into(),
        }
    }

    fn unrelated() -> ProcessError {
        ProcessError::Exited {
            program: "qemu-img".into(),
            code: 1,
            stdout: String::new(),
            stderr: "qemu-img: No space left on device".into(),
        }
    }

    #[test]
    fn test_flags_after_subcommand() {
        let base = args(&["resize", "-f", "raw", "/data/disk.img", "1024"]);
        assert_eq!(
            with_method(&base, &["--preallocation=falloc"], Placement::AfterSubcommand),
            args(&["resize", "--preallocation=falloc", "-f", "raw", "/data/disk.img", "1024"])
        );
    }

    #[test]
    fn test_flags_trailing() {
        let base = args(&["create", "-f", "raw", "/data/disk.img", "1024"]);
        assert_eq!(
            with_method(&base, &["-o", "preallocation=falloc"], Placement::Trailing),
            args(&["create", "-f", "raw", "/data/disk.img", "1024", "-o", "preallocation=falloc"])
        );
    }

    #[test]
    fn test_third_method_succeeds_after_two_unsupported() {
        let base = args(&["convert", "-t", "none", "-p", "-O", "raw", "src", "dst"]);
        let mut calls = Vec::new();

        let result = apply_with_fallback(
            &base,
            preallocation::CONVERT,
            Placement::AfterSubcommand,
            |args| {
                calls.push(args.to_vec());
                match calls.len() {
                    3 => Ok("converted"),
                    _ => Err(unsupported()),
                }
            },
        );

        assert_eq!(result.unwrap(), "converted");
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0][1..3], args(&["-o", "preallocation=falloc"])[..]);
        assert_eq!(calls[1][1..3], args(&["-o", "preallocation=full"])[..]);
        assert_eq!(calls[2][1..3], args(&["-S", "0"])[..]);
    }

    #[test]
    fn test_success_stops_chain() {
        let mut calls = 0;
        let result = apply_with_fallback(
            &args(&["convert", "src", "dst"]),
            preallocation::CONVERT,
            Placement::AfterSubcommand,
            |_| {
                calls += 1;
                Ok(())
            },
        );
        assert!(result.is_ok());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_unrelated_failure_stops_chain() {
        let mut calls = 0;
        let err = apply_with_fallback(
            &args(&["convert", "src", "dst"]),
            preallocation::CONVERT,
            Placement::AfterSubcommand,
            |_| -> Result<(), ProcessError> {
                calls += 1;
                if calls == 1 { Err(unsupported()) } else { Err(unrelated()) }
            },
        )
        .unwrap_err();

        assert_eq!(calls, 2);
        assert!(err.output_contains("No space left"));
    }

    #[test]
    fn test_exhausted_chain_returns_last_failure() {
        let mut calls = 0;
        let err = apply_with_fallback(
            &args(&["resize", "img", "1024"]),
            preallocation::RESIZE,
            Placement::AfterSubcommand,
            |_| -> Result<(), ProcessError> {
                calls += 1;
                Err(unsupported())
            },
        )
        .unwrap_err();

        assert_eq!(calls, 2);
        assert!(err.output_contains(UNSUPPORTED_PREALLOCATION));
    }

    #[test]
    fn test_empty_chain_runs_base_args() {
        let base = args(&["resize", "img", "1024"]);
        let seen = apply_with_fallback(&base, &[], Placement::AfterSubcommand, |args| {
            Ok(args.to_vec())
        })
        .unwrap();
        assert_eq!(seen, base);
    }
}
