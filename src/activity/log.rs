//! Persisted activity counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::error::Result;

/// File name of the persisted counters inside the data directory.
pub const ACTIVITY_FILE: &str = "activity.json";

/// Counters for the current process, optionally seeded from disk.
#[derive(Debug)]
pub struct ActivityLog {
    /// Number of capture jobs that produced a flow store
    captures_completed: AtomicU64,
    /// Number of pcap files replayed through the exporter
    pcaps_processed: AtomicU64,
    /// Number of time slices fetched from a store
    slices_streamed: AtomicU64,
    /// Number of rows written to CSV
    rows_exported: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting counters
    persist_path: Option<PathBuf>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self {
            captures_completed: AtomicU64::new(0),
            pcaps_processed: AtomicU64::new(0),
            slices_streamed: AtomicU64::new(0),
            rows_exported: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log backed by `path`, loading previous counters if present.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            warn!(error = %e, "could not load previous activity counters");
        }

        log
    }

    /// Log stored as [`ACTIVITY_FILE`] under `data_dir`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::with_persistence(data_dir.join(ACTIVITY_FILE))
    }

    pub fn record_capture_completed(&self) {
        self.captures_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pcaps_processed(&self, count: u64) {
        self.pcaps_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_slice_streamed(&self) {
        self.slices_streamed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slices_streamed(&self, count: u64) {
        self.slices_streamed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rows_exported(&self, count: u64) {
        self.rows_exported.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> ActivityStats {
        ActivityStats {
            captures_completed: self.captures_completed.load(Ordering::Relaxed),
            pcaps_processed: self.pcaps_processed.load(Ordering::Relaxed),
            slices_streamed: self.slices_streamed.load(Ordering::Relaxed),
            rows_exported: self.rows_exported.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Activity:\n\
             - Captures completed: {}\n\
             - Pcap files processed: {}\n\
             - Time slices streamed: {}\n\
             - Rows exported: {}",
            stats.captures_completed,
            stats.pcaps_processed,
            stats.slices_streamed,
            stats.rows_exported,
        )
    }

    /// Save counters to disk. A log without a path does nothing.
    pub fn save(&self) -> Result<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let stats = self.stats();
        let persisted = PersistedStats {
            captures_completed: stats.captures_completed,
            pcaps_processed: stats.pcaps_processed,
            slices_streamed: stats.slices_streamed,
            rows_exported: stats.rows_exported,
            last_updated: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "activity counters saved");
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedStats =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;

        self.captures_completed
            .store(persisted.captures_completed, Ordering::Relaxed);
        self.pcaps_processed
            .store(persisted.pcaps_processed, Ordering::Relaxed);
        self.slices_streamed
            .store(persisted.slices_streamed, Ordering::Relaxed);
        self.rows_exported
            .store(persisted.rows_exported, Ordering::Relaxed);
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.captures_completed.store(0, Ordering::Relaxed);
        self.pcaps_processed.store(0, Ordering::Relaxed);
        self.slices_streamed.store(0, Ordering::Relaxed);
        self.rows_exported.store(0, Ordering::Relaxed);
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the activity counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStats {
    pub captures_completed: u64,
    pub pcaps_processed: u64,
    pub slices_streamed: u64,
    pub rows_exported: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    captures_completed: u64,
    pcaps_processed: u64,
    slices_streamed: u64,
    rows_exported: u64,
    last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_counting() {
        let log = ActivityLog::new();

        log.record_capture_completed();
        log.record_pcaps_processed(3);
        log.record_slice_streamed();
        log.record_slices_streamed(4);
        log.record_rows_exported(120);

        let stats = log.stats();
        assert_eq!(stats.captures_completed, 1);
        assert_eq!(stats.pcaps_processed, 3);
        assert_eq!(stats.slices_streamed, 5);
        assert_eq!(stats.rows_exported, 120);
    }

    #[test]
    fn test_activity_reset() {
        let log = ActivityLog::new();
        log.record_rows_exported(10);
        log.reset();
        assert_eq!(log.stats().rows_exported, 0);
    }

    #[test]
    fn test_summary_format() {
        let log = ActivityLog::new();
        log.record_pcaps_processed(2);
        let summary = log.summary();

        assert!(summary.contains("Captures completed: 0"));
        assert!(summary.contains("Pcap files processed: 2"));
        assert!(summary.contains("Rows exported"));
    }

    #[test]
    fn test_counters_survive_reload() {
        let dir = tempfile::tempdir().unwrap();

        let log = ActivityLog::in_data_dir(dir.path());
        log.record_capture_completed();
        log.record_rows_exported(42);
        log.save().unwrap();

        let reloaded = ActivityLog::in_data_dir(dir.path());
        assert_eq!(reloaded.stats().captures_completed, 1);
        assert_eq!(reloaded.stats().rows_exported, 42);
    }

    #[test]
    fn test_corrupt_file_starts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ACTIVITY_FILE), "not json").unwrap();

        let log = ActivityLog::in_data_dir(dir.path());
        assert_eq!(log.stats().slices_streamed, 0);
    }

    #[test]
    fn test_unpersisted_save_is_noop() {
        assert!(ActivityLog::new().save().is_ok());
    }
}
