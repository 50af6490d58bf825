//! Cancellation-aware progress reporting, consulted between units of
//! work throughout the coverage builder and disaggregator so a run can
//! be aborted cleanly instead of failing. Grounded on the
//! `AsyncProgressNotification` usage pattern in the teacher's
//! `tools/createtiles`.

use crate::error::{Error, Result};

/// Implemented by whatever drives a run (CLI progress bar, test
/// harness, nothing at all). `tick` is called once per unit of work;
/// returning `Err(Error::Cancelled)` unwinds the current stage cleanly.
pub trait ProgressSink: Sync {
    fn reset(&self, _total: u64) {}

    fn tick(&self) -> Result<()> {
        Ok(())
    }

    /// Convenience for call sites that only care about cancellation,
    /// not progress accounting.
    fn check_cancelled(&self) -> Result<()> {
        self.tick()
    }
}

/// No-op sink for tests and headless use.
pub struct NullProgress;

impl ProgressSink for NullProgress {}

/// Tracks a cancellation flag set from another thread (e.g. a signal
/// handler) and an optional total/count for percentage reporting.
pub struct AtomicProgress {
    cancelled: std::sync::atomic::AtomicBool,
    completed: std::sync::atomic::AtomicU64,
    total: std::sync::atomic::AtomicU64,
}

impl Default for AtomicProgress {
    fn default() -> Self {
        Self {
            cancelled: std::sync::atomic::AtomicBool::new(false),
            completed: std::sync::atomic::AtomicU64::new(0),
            total: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl AtomicProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl ProgressSink for AtomicProgress {
    fn reset(&self, total: u64) {
        self.total.store(total, std::sync::atomic::Ordering::Relaxed);
        self.completed.store(0, std::sync::atomic::Ordering::Relaxed);
    }

    fn tick(&self) -> Result<()> {
        if self.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        self.completed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_observed_on_next_tick() {
        let progress = AtomicProgress::new();
        progress.reset(10);
        assert!(progress.tick().is_ok());
        progress.cancel();
        assert!(matches!(progress.tick(), Err(Error::Cancelled)));
    }
}
