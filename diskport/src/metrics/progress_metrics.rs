//! Per-owner progress counters.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Destination for conversion progress.
///
/// Implement this to forward progress into an external metrics system.
pub trait ProgressGauge: Send + Sync {
    /// Current value for `owner` (0.0 when nothing was published yet).
    fn get(&self, owner: &str) -> f64;

    /// Add a positive `delta` to the value for `owner`.
    fn add(&self, owner: &str, delta: f64);
}

/// Storage for progress counters.
///
/// Shared between the reporter (writer) and any number of
/// [`ProgressMetrics`] handles (readers).
#[derive(Clone, Default, Debug)]
pub struct ProgressMetricsStorage {
    values: Arc<Mutex<HashMap<String, f64>>>,
}

impl ProgressMetricsStorage {
    /// Create new progress metrics storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for querying the stored counters.
    pub fn handle(&self) -> ProgressMetrics {
        ProgressMetrics {
            storage: self.clone(),
        }
    }
}

impl ProgressGauge for ProgressMetricsStorage {
    fn get(&self, owner: &str) -> f64 {
        self.values.lock().get(owner).copied().unwrap_or_default()
    }

    fn add(&self, owner: &str, delta: f64) {
        *self.values.lock().entry(owner.to_string()).or_default() += delta;
    }
}

/// Handle for querying progress metrics.
///
/// Cloneable, lightweight handle (only an Arc pointer).
#[derive(Clone, Debug)]
pub struct ProgressMetrics {
    storage: ProgressMetricsStorage,
}

impl ProgressMetrics {
    /// Progress percentage published for `owner` so far.
    pub fn progress(&self, owner: &str) -> f64 {
        self.storage.get(owner)
    }

    /// Snapshot of every owner's progress.
    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.storage.values.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_accumulates_per_owner() {
        let storage = ProgressMetricsStorage::new();
        storage.add("job-a", 10.0);
        storage.add("job-a", 15.5);
        storage.add("job-b", 3.0);

        let metrics = storage.handle();
        assert_eq!(metrics.progress("job-a"), 25.5);
        assert_eq!(metrics.progress("job-b"), 3.0);
        assert_eq!(metrics.progress("job-c"), 0.0);
        assert_eq!(metrics.snapshot().len(), 2);
    }
}
