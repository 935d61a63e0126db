//! Output capture from a guarded tool's stdout/stderr.
//!
//! Each pipe gets a dedicated reader thread that keeps the raw bytes for the
//! caller and hands every line to an optional sink while the tool is still
//! running. Lines end at `\n` or `\r`: qemu-img redraws its progress line
//! with carriage returns and only prints a newline when it finishes.

use std::io::{self, BufRead, BufReader, Read};
use std::thread::{self, Scope, ScopedJoinHandle};

use super::LineSink;
use crate::util::TOOL_LOG_TARGET;

/// Spawns a scoped thread that drains `reader` until the pipe closes.
///
/// # Returns
/// * `Ok(handle)` - joining yields every byte the tool wrote to the stream
/// * `Err(...)` - the thread could not be spawned
pub(super) fn spawn_collector<'scope, 'env, R>(
    scope: &'scope Scope<'scope, 'env>,
    reader: R,
    stream_name: &'static str,
    sink: Option<&'env LineSink<'env>>,
) -> io::Result<ScopedJoinHandle<'scope, io::Result<Vec<u8>>>>
where
    R: Read + Send + 'scope,
{
    thread::Builder::new()
        .name(format!("diskport-{}", stream_name))
        .spawn_scoped(scope, move || collect(reader, stream_name, sink))
}

/// Waits for a collector thread, turning a panic into an I/O error.
pub(super) fn join(handle: ScopedJoinHandle<'_, io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("output reader thread panicked")))
}

fn collect<R: Read>(
    reader: R,
    stream_name: &str,
    sink: Option<&LineSink<'_>>,
) -> io::Result<Vec<u8>> {
    let mut reader = BufReader::new(reader);
    let mut captured = Vec::new();
    let mut line = Vec::new();

    loop {
        let chunk = match reader.fill_buf() {
            Ok(chunk) => chunk,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if chunk.is_empty() {
            break;
        }

        let len = chunk.len();
        captured.extend_from_slice(chunk);
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                emit(&line, stream_name, sink);
                line.clear();
            } else {
                line.push(byte);
            }
        }
        reader.consume(len);
    }

    emit(&line, stream_name, sink);
    tracing::trace!(target: TOOL_LOG_TARGET, stream = stream_name, "Pipe closed");
    Ok(captured)
}

fn emit(line: &[u8], stream_name: &str, sink: Option<&LineSink<'_>>) {
    if line.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(line);
    let clean_line = strip_ansi_codes(&text);
    tracing::trace!(target: TOOL_LOG_TARGET, stream = stream_name, "{}", clean_line);
    if let Some(sink) = sink {
        sink(&clean_line);
    }
}

/// Strips ANSI escape codes from a string.
fn strip_ansi_codes(text: &str) -> String {
    // Simple ANSI escape sequence pattern: \x1b[...m
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.next() == Some('[') {
                for next_char in chars.by_ref() {
                    if next_char == 'm' {
                        break;
                    }
                }
            }
        } else {
            result.push(c);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn lines_of(input: &[u8]) -> (Vec<String>, Vec<u8>) {
        let seen = Mutex::new(Vec::new());
        let sink = |line: &str| seen.lock().push(line.to_string());
        let captured = collect(input, "stdout", Some(&sink)).unwrap();
        (seen.into_inner(), captured)
    }

    #[test]
    fn test_splits_on_carriage_return_and_newline() {
        let (lines, captured) = lines_of(b"    (0.00/100%)\r    (50.00/100%)\r    (99.99/100%)\n");
        assert_eq!(
            lines,
            vec!["    (0.00/100%)", "    (50.00/100%)", "    (99.99/100%)"]
        );
        assert_eq!(captured.len(), 50);
    }

    #[test]
    fn test_trailing_partial_line_is_emitted() {
        let (lines, _) = lines_of(b"first\r\nsecond");
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn test_without_sink_still_captures() {
        let captured = collect(&b"{\"format\": \"raw\"}\n"[..], "stdout", None).unwrap();
        assert_eq!(captured, b"{\"format\": \"raw\"}\n");
    }

    #[test]
    fn test_strip_ansi_codes() {
        assert_eq!(strip_ansi_codes("\x1b[31merror\x1b[0m: bad"), "error: bad");
        assert_eq!(strip_ansi_codes("plain"), "plain");
    }
}
