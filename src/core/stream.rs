//! Lazy, slice-by-slice retrieval of flow records.
//!
//! A [`FlowStreamer`] runs one blocking nfdump call per time slice and yields
//! the captured text. It is finite, fused and not restartable: once it is
//! exhausted (or has yielded an error) a new streamer must be created.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::iter::FusedIterator;
use tracing::{debug, warn};

use super::windowing::{TimeSlice, TimeSlices, TimeWindowSlicer};
use crate::error::Result;
use crate::process::{ProcessRunner, RunOptions};
use crate::query::{QueryBuilder, QuerySpec, FIELD_DELIMITER};

/// One decoded output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowRow {
    pub fields: Vec<String>,
}

impl FlowRow {
    /// Split a line on the field delimiter and trim every field.
    pub fn parse(line: &str) -> Self {
        Self {
            fields: line
                .split(FIELD_DELIMITER)
                .map(|f| f.trim().to_string())
                .collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `"<proto> <src>:<sport> -> <dst>:<dport>"` built from the first five
    /// fields, or `None` for shorter rows.
    pub fn flow_index(&self) -> Option<String> {
        match self.fields.as_slice() {
            [proto, src, sport, dst, dport, ..] => {
                Some(format!("{proto} {src}:{sport} -> {dst}:{dport}"))
            }
            _ => None,
        }
    }
}

/// Decode engine output into rows.
///
/// The segment after the final line break is the summary (or the empty
/// remainder of a trailing newline) and is dropped; blank lines are skipped.
pub fn decode_rows(text: &str) -> Vec<FlowRow> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    lines.pop();

    lines
        .into_iter()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(FlowRow::parse)
        .collect()
}

/// Raw output of one slice's query.
///
/// `text` holds only this slice's output; it is not accumulated across the
/// slices of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceBatch {
    pub slice: TimeSlice,
    pub text: String,
}

impl SliceBatch {
    pub fn start(&self) -> NaiveDateTime {
        self.slice.start
    }

    pub fn decode(&self) -> Vec<FlowRow> {
        decode_rows(&self.text)
    }
}

/// Iterator of `(slice start, output)` batches over a flow store.
pub struct FlowStreamer<'a, R: ProcessRunner> {
    runner: &'a R,
    builder: QueryBuilder,
    spec: QuerySpec,
    slices: TimeSlices,
    total: usize,
    options: RunOptions,
    done: bool,
}

impl<'a, R: ProcessRunner> FlowStreamer<'a, R> {
    /// The spec is taken by value; later changes by the caller do not affect
    /// a running stream.
    pub fn new(
        runner: &'a R,
        builder: QueryBuilder,
        spec: QuerySpec,
        slicer: &TimeWindowSlicer,
        options: RunOptions,
    ) -> Self {
        Self {
            runner,
            builder,
            spec,
            slices: slicer.iter(),
            total: slicer.count(),
            options,
            done: false,
        }
    }

    /// Number of slices the stream was created with.
    pub fn total_slices(&self) -> usize {
        self.total
    }

    /// Slices not yet fetched.
    pub fn remaining(&self) -> usize {
        if self.done {
            0
        } else {
            self.slices.len()
        }
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    fn fetch(&self, slice: TimeSlice) -> Option<Result<SliceBatch>> {
        let range = slice.time_range();
        let Some(command) = self.builder.command(&self.spec, &range) else {
            warn!(
                store = %self.builder.store().display(),
                "flow store is neither a file nor a directory, nothing to query"
            );
            return None;
        };

        let result = self
            .runner
            .run_checked(&command, &self.options)
            .map(|output| SliceBatch {
                slice,
                text: output.stdout_text(),
            });

        if let Ok(batch) = &result {
            debug!(
                slice = %slice.start,
                bytes = batch.text.len(),
                remaining = self.slices.len(),
                "slice fetched"
            );
        }
        Some(result)
    }
}

impl<R: ProcessRunner> Iterator for FlowStreamer<'_, R> {
    type Item = Result<SliceBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let Some(slice) = self.slices.next() else {
            self.done = true;
            return None;
        };

        match self.fetch(slice) {
            Some(Ok(batch)) => Some(Ok(batch)),
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}

impl<R: ProcessRunner> FusedIterator for FlowStreamer<'_, R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::process::{ProcessOutput, ScriptedRunner};
    use chrono::Duration;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn ten_minutes() -> TimeWindowSlicer {
        TimeWindowSlicer::new(
            at("2024-01-01 00:00:00"),
            at("2024-01-01 00:10:00"),
            Duration::seconds(60),
            Duration::seconds(300),
        )
        .unwrap()
    }

    fn store() -> (tempfile::TempDir, QueryBuilder) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows");
        std::fs::write(&path, b"").unwrap();
        (dir, QueryBuilder::new("nfdump", path))
    }

    #[test]
    fn test_decode_drops_footer_and_trims() {
        let text = "  TCP | 10.0.0.1 |  80\nUDP|10.0.0.2|53 \n ICMP |10.0.0.3| 0\nSummary: 3 flows";
        let rows = decode_rows(text);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].fields, vec!["TCP", "10.0.0.1", "80"]);
        assert_eq!(rows[1].fields, vec!["UDP", "10.0.0.2", "53"]);
        assert_eq!(rows[2].get(0), Some("ICMP"));
        assert!(rows.iter().all(|r| r.fields.iter().all(|f| f.trim() == f)));
    }

    #[test]
    fn test_decode_quiet_output_with_trailing_newline() {
        let rows = decode_rows("a|b\r\nc|d\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].fields, vec!["c", "d"]);
        assert!(decode_rows("").is_empty());
        assert!(decode_rows("\n\n").is_empty());
    }

    #[test]
    fn test_flow_index() {
        let row = FlowRow::parse("TCP|10.0.0.1|51234|10.0.0.2|80|2024-01-01 00:00:03.120|0.020");
        assert_eq!(
            row.flow_index().as_deref(),
            Some("TCP 10.0.0.1:51234 -> 10.0.0.2:80")
        );
        assert_eq!(FlowRow::parse("TCP|10.0.0.1").flow_index(), None);
    }

    #[test]
    fn test_one_query_per_slice() {
        let (_dir, builder) = store();
        let runner = ScriptedRunner::new();
        runner
            .respond("nfdump", ProcessOutput::success("first|1\n"))
            .respond("nfdump", ProcessOutput::success("second|2\n"));

        let stream = FlowStreamer::new(
            &runner,
            builder,
            QuerySpec::new(),
            &ten_minutes(),
            RunOptions::default(),
        );
        assert_eq!(stream.total_slices(), 2);

        let batches: Vec<SliceBatch> = stream.collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].start(), at("2024-01-01 00:00:00"));
        assert_eq!(batches[0].text, "first|1\n");
        assert_eq!(batches[1].start(), at("2024-01-01 00:05:00"));
        assert_eq!(batches[1].text, "second|2\n");
        assert_eq!(batches[1].decode()[0].fields, vec!["second", "2"]);

        let runs = runner.runs_of("nfdump");
        assert_eq!(runs.len(), 2);
        assert!(runs[0]
            .args
            .contains(&"2024/01/01.00:00:00-2024/01/01.00:01:00".to_string()));
        assert!(runs[1]
            .args
            .contains(&"2024/01/01.00:05:00-2024/01/01.00:06:00".to_string()));
    }

    #[test]
    fn test_error_ends_stream() {
        let (_dir, builder) = store();
        let runner = ScriptedRunner::new();
        runner.respond("nfdump", ProcessOutput::failure(255, "Error reading file"));

        let mut stream = FlowStreamer::new(
            &runner,
            builder,
            QuerySpec::new(),
            &ten_minutes(),
            RunOptions::default(),
        );

        assert!(matches!(stream.next(), Some(Err(Error::ProcessExit { .. }))));
        assert!(stream.next().is_none());
        assert_eq!(stream.remaining(), 0);
        assert_eq!(runner.runs_of("nfdump").len(), 1);
    }

    #[test]
    fn test_missing_store_yields_nothing() {
        let runner = ScriptedRunner::new();
        let builder = QueryBuilder::new("nfdump", "/nonexistent/flowslice/flows");
        let mut stream = FlowStreamer::new(
            &runner,
            builder,
            QuerySpec::new(),
            &ten_minutes(),
            RunOptions::default(),
        );

        assert!(stream.next().is_none());
        assert!(runner.invocations().is_empty());
    }

    #[test]
    fn test_not_restartable() {
        let (_dir, builder) = store();
        let runner = ScriptedRunner::new();
        let mut stream = FlowStreamer::new(
            &runner,
            builder,
            QuerySpec::new(),
            &ten_minutes(),
            RunOptions::default(),
        );

        assert_eq!(stream.by_ref().count(), 2);
        assert!(stream.next().is_none());
        assert_eq!(runner.runs_of("nfdump").len(), 2);
    }
}
