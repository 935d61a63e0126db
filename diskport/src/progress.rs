//! Conversion progress extraction.
//!
//! `qemu-img -p` prints its progress as `(NN.NN/100%)`. That token is a
//! fixed contract with the tool's output format; lines that do not carry it
//! are ignored. Parsed values are republished to a [`ProgressGauge`] as
//! positive deltas only, so the published counter never moves backwards.

use std::sync::{Arc, LazyLock};

use diskport_shared::constants::signatures::PROGRESS_PATTERN;
use regex::Regex;

use crate::metrics::ProgressGauge;

static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PROGRESS_PATTERN).expect("progress pattern is a valid regex"));

/// Republishes tool progress for the import job owning this process.
///
/// With no owner configured every line is ignored.
#[derive(Clone)]
pub struct ProgressReporter {
    owner: Option<String>,
    gauge: Arc<dyn ProgressGauge>,
}

impl ProgressReporter {
    pub fn new(owner: Option<String>, gauge: Arc<dyn ProgressGauge>) -> Self {
        let owner = owner.filter(|o| !o.is_empty());
        Self { owner, gauge }
    }

    /// Owner key progress is published under, if any.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Feed one line of tool output.
    pub fn on_line(&self, line: &str) {
        let Some(owner) = self.owner.as_deref() else {
            return;
        };
        let Some(value) = parse_progress(line) else {
            return;
        };

        tracing::debug!(owner, progress = value, "Conversion progress");
        let published = self.gauge.get(owner);
        if value > 0.0 && value > published {
            self.gauge.add(owner, value - published);
        }
    }
}

/// Extract the percentage from a `(NN.NN/100%)` token.
pub fn parse_progress(line: &str) -> Option<f64> {
    PROGRESS_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Gauge that records every published delta.
    #[derive(Default)]
    struct RecordingGauge {
        value: Mutex<f64>,
        deltas: Mutex<Vec<f64>>,
    }

    impl ProgressGauge for RecordingGauge {
        fn get(&self, _owner: &str) -> f64 {
            *self.value.lock()
        }

        fn add(&self, _owner: &str, delta: f64) {
            *self.value.lock() += delta;
            self.deltas.lock().push(delta);
        }
    }

    fn line(pct: f64) -> String {
        format!("    ({:.2}/100%)", pct)
    }

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("    (45.34/100%)"), Some(45.34));
        assert_eq!(parse_progress("(0.00/100%)"), Some(0.0));
        assert_eq!(parse_progress("(5.10/100%)"), Some(5.1));
        assert_eq!(parse_progress("(100.00/100%)"), None);
        assert_eq!(parse_progress("qemu-img: error"), None);
        assert_eq!(parse_progress("(45.3/100%)"), None);
    }

    #[test]
    fn test_publishes_only_increases() {
        let gauge = Arc::new(RecordingGauge::default());
        let reporter = ProgressReporter::new(Some("job-1".into()), gauge.clone());

        for pct in [10.0, 5.0, 20.0, 20.0, 30.0] {
            reporter.on_line(&line(pct));
        }

        assert_eq!(*gauge.deltas.lock(), vec![10.0, 10.0, 10.0]);
        assert_eq!(*gauge.value.lock(), 30.0);
    }

    #[test]
    fn test_zero_progress_is_not_published() {
        let gauge = Arc::new(RecordingGauge::default());
        let reporter = ProgressReporter::new(Some("job-1".into()), gauge.clone());

        reporter.on_line(&line(0.0));
        assert!(gauge.deltas.lock().is_empty());
    }

    #[test]
    fn test_without_owner_nothing_is_published() {
        let gauge = Arc::new(RecordingGauge::default());

        ProgressReporter::new(None, gauge.clone()).on_line(&line(50.0));
        ProgressReporter::new(Some(String::new()), gauge.clone()).on_line(&line(50.0));

        assert!(gauge.deltas.lock().is_empty());
    }

    #[test]
    fn test_unparsable_lines_are_ignored() {
        let gauge = Arc::new(RecordingGauge::default());
        let reporter = ProgressReporter::new(Some("job-1".into()), gauge.clone());

        reporter.on_line("Formatting '/data/disk.img', fmt=raw size=1073741824");
        reporter.on_line("");
        assert!(gauge.deltas.lock().is_empty());
    }
}
