//! Pollable progress of a capture job.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Error;

/// Lifecycle of a capture job.
///
/// `Idle -> Capturing -> Exporting (once per input) -> Finalizing -> Idle`;
/// a failure in any state goes straight back to `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    #[default]
    Idle,
    /// Daemon starting
    Capturing,
    /// Replaying captures through the exporter
    Exporting,
    /// Stopping processes and moving the output into place
    Finalizing,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Capturing => "capturing",
            CaptureState::Exporting => "exporting",
            CaptureState::Finalizing => "finalizing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct Status {
    state: CaptureState,
    message: String,
    last_error: Option<String>,
    started: Option<Instant>,
    finished: Option<Instant>,
}

/// Progress shared between a running job and its observers.
#[derive(Debug, Default)]
pub struct CaptureProgress {
    processed: AtomicUsize,
    total: AtomicUsize,
    status: Mutex<Status>,
}

/// Thread-safe shared progress record.
pub type SharedCaptureProgress = Arc<CaptureProgress>;

impl CaptureProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCaptureProgress {
        Arc::new(Self::new())
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new job of `total` inputs, clearing the previous one.
    pub fn begin(&self, total: usize) {
        self.processed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);

        let mut status = self.status();
        *status = Status {
            state: CaptureState::Capturing,
            message: format!("Starting capture of {total} file(s)"),
            started: Some(Instant::now()),
            ..Status::default()
        };
    }

    pub fn set_state(&self, state: CaptureState, message: impl Into<String>) {
        let mut status = self.status();
        status.state = state;
        status.message = message.into();
    }

    /// Count one more replayed input; returns the new count.
    pub fn increment_processed(&self) -> usize {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_error(&self, error: &Error) {
        let mut status = self.status();
        status.last_error = Some(error.to_string());
        status.message = format!("Capture failed: {error}");
    }

    /// Return to `Idle`, keeping counters and the last error for inspection.
    pub fn finish(&self) {
        let mut status = self.status();
        status.state = CaptureState::Idle;
        status.finished = Some(Instant::now());
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> CaptureState {
        self.status().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.status().last_error.clone()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let status = self.status();
        let elapsed = match (status.started, status.finished) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };

        ProgressSnapshot {
            processed: self.processed(),
            total: self.total(),
            state: status.state,
            message: status.message.clone(),
            last_error: status.last_error.clone(),
            elapsed,
        }
    }
}

/// Point-in-time copy of [`CaptureProgress`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub total: usize,
    pub state: CaptureState,
    pub message: String,
    pub last_error: Option<String>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Completed share in `[0, 1]`; zero for an empty job.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs();
        write!(
            f,
            "[{}] {}/{} files, {}m {:02}s elapsed",
            self.state,
            self.processed,
            self.total,
            secs / 60,
            secs % 60
        )?;
        if !self.message.is_empty() {
            write!(f, " - {}", self.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_resets_previous_job() {
        let progress = CaptureProgress::new();
        progress.begin(3);
        progress.increment_processed();
        progress.record_error(&Error::InvalidWindow("x".into()));
        progress.finish();

        progress.begin(2);
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.processed, 0);
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.state, CaptureState::Capturing);
        assert!(snapshot.last_error.is_none());
    }

    #[test]
    fn test_counts_and_fraction() {
        let progress = CaptureProgress::new();
        progress.begin(4);
        assert_eq!(progress.increment_processed(), 1);
        assert_eq!(progress.increment_processed(), 2);
        assert_eq!(progress.snapshot().fraction(), 0.5);

        let empty = CaptureProgress::new();
        assert_eq!(empty.snapshot().fraction(), 0.0);
    }

    #[test]
    fn test_error_survives_finish() {
        let progress = CaptureProgress::new();
        progress.begin(1);
        progress.set_state(CaptureState::Exporting, "Replaying a.pcap");
        progress.record_error(&Error::Cancelled {
            program: "softflowd".into(),
        });
        progress.finish();

        assert_eq!(progress.state(), CaptureState::Idle);
        assert!(progress.last_error().unwrap().contains("softflowd"));
    }

    #[test]
    fn test_snapshot_display() {
        let progress = CaptureProgress::new();
        progress.begin(3);
        progress.increment_processed();
        progress.set_state(CaptureState::Exporting, "Replaying b.pcap");

        let line = progress.snapshot().to_string();
        assert!(line.starts_with("[exporting] 1/3 files, 0m 00s elapsed"));
        assert!(line.ends_with("Replaying b.pcap"));
    }
}
