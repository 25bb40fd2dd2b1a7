//! A flow-record store and its discovered time span.

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::stream::FlowStreamer;
use super::summary::{parse_full_window, parse_volume_unit, parse_volumes, Volumes};
use super::windowing::{time_range, TimeWindowSlicer};
use crate::error::{Error, Result};
use crate::process::{CommandSpec, ProcessRunner, RunOptions};
use crate::query::{QueryBuilder, QuerySpec, StoreKind, Unit};

/// An nfdump file or directory whose full time window has been discovered.
///
/// The window is read once from the store's own summary footer; opening a
/// different path yields a new store with its own window.
#[derive(Debug, Clone)]
pub struct FlowStore {
    kind: StoreKind,
    builder: QueryBuilder,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
}

impl FlowStore {
    /// Open a store and discover its time window.
    pub fn open<R: ProcessRunner>(
        runner: &R,
        engine: &str,
        path: impl Into<PathBuf>,
        options: &RunOptions,
    ) -> Result<Self> {
        let path = path.into();
        let kind = StoreKind::detect(&path).ok_or_else(|| Error::InputNotFound { path: path.clone() })?;
        let builder = QueryBuilder::new(engine, &path);

        let output = run_summary(runner, &builder, None, options)?;
        let (window_start, window_end) = parse_full_window(&output)?;

        info!(
            store = %path.display(),
            start = %window_start,
            end = %window_end,
            "discovered flow window"
        );

        Ok(Self {
            kind,
            builder,
            window_start,
            window_end,
        })
    }

    pub fn path(&self) -> &Path {
        self.builder.store()
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn window_start(&self) -> NaiveDateTime {
        self.window_start
    }

    pub fn window_end(&self) -> NaiveDateTime {
        self.window_end
    }

    pub fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    /// The whole window in nfdump `-t` syntax.
    pub fn full_range(&self) -> String {
        time_range(self.window_start, self.window_end)
    }

    /// Slicer over the full window.
    pub fn slicer(&self, length: Duration, stride: Duration) -> Result<TimeWindowSlicer> {
        TimeWindowSlicer::from_std(self.window_start, self.window_end, length, stride)
    }

    /// Total flows, bytes or packets over the full window.
    pub fn volume<R: ProcessRunner>(
        &self,
        runner: &R,
        unit: Unit,
        options: &RunOptions,
    ) -> Result<u64> {
        let range = self.full_range();
        let output = run_summary(runner, &self.builder, Some(&range), options)?;
        parse_volume_unit(&output, unit)
    }

    /// All three totals over the full window.
    pub fn volumes<R: ProcessRunner>(&self, runner: &R, options: &RunOptions) -> Result<Volumes> {
        let range = self.full_range();
        let output = run_summary(runner, &self.builder, Some(&range), options)?;
        parse_volumes(&output)
    }

    /// Lazily stream `spec` over the full window.
    pub fn stream<'a, R: ProcessRunner>(
        &self,
        runner: &'a R,
        spec: &QuerySpec,
        length: Duration,
        stride: Duration,
        options: RunOptions,
    ) -> Result<FlowStreamer<'a, R>> {
        let slicer = self.slicer(length, stride)?;
        Ok(FlowStreamer::new(
            runner,
            self.builder.clone(),
            spec.clone(),
            &slicer,
            options,
        ))
    }
}

fn run_summary<R: ProcessRunner>(
    runner: &R,
    builder: &QueryBuilder,
    range: Option<&str>,
    options: &RunOptions,
) -> Result<String> {
    let command = CommandSpec::from_argv(builder.summary_args(range)).ok_or_else(|| {
        Error::InputNotFound {
            path: builder.store().to_path_buf(),
        }
    })?;
    Ok(runner.run_checked(&command, options)?.stdout_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessOutput, ScriptedRunner};

    const FOOTER: &str = "\
Summary: total flows: 12, total bytes: 3400, total packets: 40, avg bps: 45, avg pps: 0, avg bpp: 85
Time window: 2024-01-01 00:00:00 - 2024-01-01 00:10:00
Total flows processed: 12, Blocks skipped: 0, Bytes read: 1100
Sys: 0.001s flows/second: 8000.0     Wall: 0.001s flows/second: 9000.0
";

    fn file_store() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample_file");
        std::fs::write(&path, b"").unwrap();
        (dir, path)
    }

    #[test]
    fn test_open_discovers_window() {
        let (_dir, path) = file_store();
        let runner = ScriptedRunner::new();
        runner.respond_always("nfdump", ProcessOutput::success(FOOTER));

        let store = FlowStore::open(&runner, "nfdump", &path, &RunOptions::default()).unwrap();
        assert_eq!(store.kind(), StoreKind::File);
        assert_eq!(
            store.full_range(),
            "2024/01/01.00:00:00-2024/01/01.00:10:00"
        );

        let runs = runner.runs_of("nfdump");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].args[..4], ["-A", "proto", "-n", "1"]);
        assert!(!runs[0].args.contains(&"-t".to_string()));
    }

    #[test]
    fn test_open_missing_store() {
        let runner = ScriptedRunner::new();
        let result = FlowStore::open(
            &runner,
            "nfdump",
            "/nonexistent/flowslice/store",
            &RunOptions::default(),
        );
        assert!(matches!(result, Err(Error::InputNotFound { .. })));
        assert!(runner.invocations().is_empty());
    }

    #[test]
    fn test_volume_queries_full_range() {
        let (_dir, path) = file_store();
        let runner = ScriptedRunner::new();
        runner.respond_always("nfdump", ProcessOutput::success(FOOTER));

        let store = FlowStore::open(&runner, "nfdump", &path, &RunOptions::default()).unwrap();
        assert_eq!(
            store
                .volume(&runner, Unit::Bytes, &RunOptions::default())
                .unwrap(),
            3400
        );
        assert_eq!(
            store.volumes(&runner, &RunOptions::default()).unwrap().packets,
            40
        );

        let last = runner.runs_of("nfdump").pop().unwrap();
        assert!(last.args.contains(&store.full_range()));
    }

    #[test]
    fn test_stream_uses_configured_slicing() {
        let (_dir, path) = file_store();
        let runner = ScriptedRunner::new();
        runner.respond("nfdump", ProcessOutput::success(FOOTER));

        let store = FlowStore::open(&runner, "nfdump", &path, &RunOptions::default()).unwrap();
        let stream = store
            .stream(
                &runner,
                &QuerySpec::new(),
                Duration::from_secs(1),
                Duration::from_secs(60),
                RunOptions::default(),
            )
            .unwrap();
        assert_eq!(stream.total_slices(), 10);
    }
}
