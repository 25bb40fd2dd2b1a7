//! CSV writer for decoded flow rows.

use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::core::{FlowRow, SliceBatch};
use crate::error::{Error, Result};
use crate::query::{QuerySpec, Variable};

/// Header of the synthetic flow key column in [`CsvLayout::Indexed`].
pub const INDEX_COLUMN: &str = "INDEX";

/// Standard raw-field extraction set. The first five fields identify the flow.
pub const EXTRACTION_VARIABLES: [Variable; 10] = [
    Variable::Protocol,
    Variable::SourceAddress,
    Variable::SourcePort,
    Variable::DestinationAddress,
    Variable::DestinationPort,
    Variable::FirstSeen,
    Variable::Duration,
    Variable::TcpFlags,
    Variable::Packets,
    Variable::Bytes,
];

/// Query printing [`EXTRACTION_VARIABLES`] without aggregation.
pub fn extraction_spec() -> QuerySpec {
    QuerySpec::new().with_variables(EXTRACTION_VARIABLES)
}

/// How rows are laid out in the CSV file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CsvLayout {
    /// Every decoded field in its own column
    #[default]
    Raw,
    /// The five key fields folded into one flow index column, then the rest
    Indexed,
}

/// Totals of one export run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub slices: usize,
    pub rows: u64,
}

/// Writes decoded rows with every field quoted and `\n` line endings.
///
/// Rows may have differing lengths. The underlying file is flushed on
/// [`FlowTableWriter::finish`] and closed on drop.
pub struct FlowTableWriter<W: Write> {
    writer: csv::Writer<W>,
    layout: CsvLayout,
    rows_written: u64,
}

impl FlowTableWriter<File> {
    /// Open `path` for writing, appending to existing content when `append`
    /// is set.
    pub fn create(path: &Path, layout: CsvLayout, append: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;

        info!(path = %path.display(), ?layout, append, "writing flow table");
        Ok(Self::from_writer(file, layout))
    }
}

impl<W: Write> FlowTableWriter<W> {
    pub fn from_writer(inner: W, layout: CsvLayout) -> Self {
        let writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .terminator(Terminator::Any(b'\n'))
            .flexible(true)
            .has_headers(false)
            .from_writer(inner);

        Self {
            writer,
            layout,
            rows_written: 0,
        }
    }

    pub fn layout(&self) -> CsvLayout {
        self.layout
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Column names for the given variables under this writer's layout.
    pub fn write_header(&mut self, variables: &[Variable]) -> Result<()> {
        let names: Vec<&str> = variables.iter().map(|v| v.name()).collect();
        match self.layout {
            CsvLayout::Raw => self.writer.write_record(&names)?,
            CsvLayout::Indexed => {
                let rest = names.get(5..).unwrap_or_default();
                self.writer
                    .write_record(std::iter::once(INDEX_COLUMN).chain(rest.iter().copied()))?
            }
        }
        Ok(())
    }

    /// Write one decoded row.
    ///
    /// In the indexed layout, rows too short to carry a flow key are written
    /// unchanged.
    pub fn write_row(&mut self, row: &FlowRow) -> Result<()> {
        match (self.layout, row.flow_index()) {
            (CsvLayout::Indexed, Some(index)) => {
                let rest = row.fields[5..].iter().map(String::as_str);
                self.writer
                    .write_record(std::iter::once(index.as_str()).chain(rest))?;
            }
            _ => self.writer.write_record(&row.fields)?,
        }
        self.rows_written += 1;
        Ok(())
    }

    /// Decode a batch and write all of its rows; returns the number written.
    pub fn write_batch(&mut self, batch: &SliceBatch) -> Result<u64> {
        let rows = batch.decode();
        for row in &rows {
            self.write_row(row)?;
        }
        debug!(slice = %batch.start(), rows = rows.len(), "batch written");
        Ok(rows.len() as u64)
    }

    /// Flush buffered rows and return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        self.writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))
    }
}

/// Drain `batches` into `writer`, stopping after `max_slices` when given.
///
/// The first error ends the export; rows already written stay in the writer.
pub fn export_stream<I, W>(
    batches: I,
    writer: &mut FlowTableWriter<W>,
    max_slices: Option<usize>,
) -> Result<ExportSummary>
where
    I: IntoIterator<Item = Result<SliceBatch>>,
    W: Write,
{
    let mut summary = ExportSummary::default();

    for batch in batches
        .into_iter()
        .take(max_slices.unwrap_or(usize::MAX))
    {
        summary.rows += writer.write_batch(&batch?)?;
        summary.slices += 1;
    }

    info!(slices = summary.slices, rows = summary.rows, "export finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TimeSlice;
    use chrono::{Duration, NaiveDateTime};

    const SLICE_OUTPUT: &str = "\
  TCP|    10.0.0.1|51234|    10.0.0.2|   80|2024-01-01 00:00:03.120|  0.020|.AP.SF|     3|   180
  UDP|    10.0.0.3|   53|    10.0.0.4|40000|2024-01-01 00:00:04.000|  0.000|......|     1|    72
";

    fn batch(text: &str) -> SliceBatch {
        let start = NaiveDateTime::parse_from_str("2024-01-01 00:00:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        SliceBatch {
            slice: TimeSlice::new(start, Duration::seconds(60)),
            text: text.to_string(),
        }
    }

    fn written(writer: FlowTableWriter<Vec<u8>>) -> String {
        String::from_utf8(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_raw_layout_quotes_every_field() {
        let mut writer = FlowTableWriter::from_writer(Vec::new(), CsvLayout::Raw);
        assert_eq!(writer.write_batch(&batch(SLICE_OUTPUT)).unwrap(), 2);
        assert_eq!(writer.rows_written(), 2);

        let out = written(writer);
        let first = out.lines().next().unwrap();
        assert_eq!(
            first,
            r#""TCP","10.0.0.1","51234","10.0.0.2","80","2024-01-01 00:00:03.120","0.020",".AP.SF","3","180""#
        );
        assert!(!out.contains('\r'));
    }

    #[test]
    fn test_indexed_layout() {
        let mut writer = FlowTableWriter::from_writer(Vec::new(), CsvLayout::Indexed);
        writer.write_header(&EXTRACTION_VARIABLES).unwrap();
        writer.write_batch(&batch(SLICE_OUTPUT)).unwrap();

        let out = written(writer);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            r#""INDEX","FIRST SEEN","DURATION","TCP FLAGS","PACKETS","BYTES""#
        );
        assert!(lines[1].starts_with(r#""TCP 10.0.0.1:51234 -> 10.0.0.2:80","2024-01-01"#));
        assert!(lines[2].starts_with(r#""UDP 10.0.0.3:53 -> 10.0.0.4:40000""#));
    }

    #[test]
    fn test_short_rows_in_indexed_layout() {
        let mut writer = FlowTableWriter::from_writer(Vec::new(), CsvLayout::Indexed);
        writer.write_batch(&batch("a|b\n")).unwrap();
        assert_eq!(written(writer), "\"a\",\"b\"\n");
    }

    #[test]
    fn test_export_respects_slice_limit() {
        let batches: Vec<Result<SliceBatch>> = vec![
            Ok(batch(SLICE_OUTPUT)),
            Ok(batch(SLICE_OUTPUT)),
            Ok(batch(SLICE_OUTPUT)),
        ];
        let mut writer = FlowTableWriter::from_writer(Vec::new(), CsvLayout::Raw);
        let summary = export_stream(batches, &mut writer, Some(1)).unwrap();
        assert_eq!(summary, ExportSummary { slices: 1, rows: 2 });
    }

    #[test]
    fn test_export_stops_on_error() {
        let batches: Vec<Result<SliceBatch>> = vec![
            Ok(batch(SLICE_OUTPUT)),
            Err(Error::InvalidWindow("boom".into())),
            Ok(batch(SLICE_OUTPUT)),
        ];
        let mut writer = FlowTableWriter::from_writer(Vec::new(), CsvLayout::Raw);
        assert!(export_stream(batches, &mut writer, None).is_err());
        assert_eq!(writer.rows_written(), 2);
    }

    #[test]
    fn test_create_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("flows.csv");

        for _ in 0..2 {
            let mut writer = FlowTableWriter::create(&path, CsvLayout::Raw, true).unwrap();
            writer.write_batch(&batch(SLICE_OUTPUT)).unwrap();
            writer.finish().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 4);

        let writer = FlowTableWriter::create(&path, CsvLayout::Raw, false).unwrap();
        writer.finish().unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().is_empty());
    }

    #[test]
    fn test_extraction_spec_prints_key_fields_first() {
        let spec = extraction_spec();
        assert_eq!(
            spec.output_format(),
            "fmt:%pr|%sa|%sp|%da|%dp|%ts|%td|%flg|%pkt|%byt"
        );
        assert!(spec.aggregation().is_none());
    }
}
