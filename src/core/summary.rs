//! Parsing of the nfdump summary footer.
//!
//! Without `-q`, nfdump ends its output with four fixed lines:
//!
//! ```text
//! Summary: total flows: 2, total bytes: 168, total packets: 2, avg bps: 0, avg pps: 0, avg bpp: 84
//! Time window: 2024-01-01 00:00:00 - 2024-01-01 00:10:00
//! Total flows processed: 2, Blocks skipped: 0, Bytes read: 244
//! Sys: 0.001s flows/second: 1204.1     Wall: 0.000s flows/second: 3540.9
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::query::Unit;

/// Timestamp format of the `Time window:` footer line.
pub const SUMMARY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const WINDOW_MARKER: &str = "Time window: ";
const WINDOW_SEPARATOR: &str = " - ";

/// Position of the time window line, counted from the end.
const WINDOW_LINE_FROM_END: usize = 3;
/// Position of the volume summary line, counted from the end.
const VOLUME_LINE_FROM_END: usize = 4;

/// Totals from the summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volumes {
    pub flows: u64,
    pub bytes: u64,
    pub packets: u64,
}

impl Volumes {
    pub fn get(&self, unit: Unit) -> u64 {
        match unit {
            Unit::Flows => self.flows,
            Unit::Bytes => self.bytes,
            Unit::Packets => self.packets,
        }
    }
}

fn malformed(line: &str, reason: impl Into<String>) -> Error {
    Error::MalformedSummary {
        line: line.to_string(),
        reason: reason.into(),
    }
}

fn line_from_end(output: &str, n: usize) -> Result<&str> {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() < n {
        return Err(malformed(
            lines.last().copied().unwrap_or_default(),
            format!("expected at least {n} footer lines, got {}", lines.len()),
        ));
    }
    Ok(lines[lines.len() - n])
}

/// Full `(start, end)` span from the `Time window:` line.
pub fn parse_full_window(output: &str) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let line = line_from_end(output, WINDOW_LINE_FROM_END)?;

    let (_, window) = line
        .split_once(WINDOW_MARKER)
        .ok_or_else(|| malformed(line, "missing 'Time window' marker"))?;
    let (start, end) = window
        .split_once(WINDOW_SEPARATOR)
        .ok_or_else(|| malformed(line, "missing ' - ' separator"))?;

    let parse = |s: &str| {
        NaiveDateTime::parse_from_str(s.trim(), SUMMARY_TIME_FORMAT)
            .map_err(|e| malformed(line, format!("bad timestamp '{}': {e}", s.trim())))
    };
    let (start, end) = (parse(start)?, parse(end)?);

    if start >= end {
        return Err(malformed(line, "window start is not before its end"));
    }
    Ok((start, end))
}

/// One total from the summary line, selected by its symbolic unit name.
pub fn parse_volume(output: &str, unit: &str) -> Result<u64> {
    let unit: Unit = unit.parse()?;
    parse_volume_unit(output, unit)
}

/// One total from the summary line.
pub fn parse_volume_unit(output: &str, unit: Unit) -> Result<u64> {
    let line = line_from_end(output, VOLUME_LINE_FROM_END)?;

    labelled_values(line)
        .into_iter()
        .find(|(label, _)| label.split_whitespace().last() == Some(unit.token()))
        .ok_or_else(|| malformed(line, format!("no {} total", unit.token())))
        .and_then(|(_, value)| {
            parse_count(value).ok_or_else(|| malformed(line, format!("bad count '{value}'")))
        })
}

/// All three totals from the summary line.
pub fn parse_volumes(output: &str) -> Result<Volumes> {
    Ok(Volumes {
        flows: parse_volume_unit(output, Unit::Flows)?,
        bytes: parse_volume_unit(output, Unit::Bytes)?,
        packets: parse_volume_unit(output, Unit::Packets)?,
    })
}

/// Pair each value with the label preceding it.
///
/// `"Summary: total flows: 2, total bytes: 168"` splits on `": "` into
/// `["Summary", "total flows", "2, total bytes", "168"]`; every middle
/// segment is `"<value>, <next label>"` unless it is a bare label.
fn labelled_values(line: &str) -> Vec<(String, &str)> {
    let segments: Vec<&str> = line.split(": ").collect();
    let mut pairs = Vec::new();
    let mut label = segments[0];

    for (i, segment) in segments.iter().enumerate().skip(1) {
        if i == segments.len() - 1 {
            pairs.push((label.trim().to_lowercase(), *segment));
            break;
        }
        match segment.rsplit_once(", ") {
            Some((value, next)) => {
                pairs.push((label.trim().to_lowercase(), value));
                label = next;
            }
            None => label = segment,
        }
    }
    pairs
}

/// `"1,234"`, `"1234"` or `"1.2 M"`.
fn parse_count(text: &str) -> Option<u64> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    let scale = match cleaned.chars().last()? {
        'k' | 'K' => 1_000,
        'M' => 1_000_000,
        'G' => 1_000_000_000,
        _ => return cleaned.parse().ok(),
    };

    let number: f64 = cleaned[..cleaned.len() - 1].parse().ok()?;
    (number >= 0.0).then(|| (number * scale as f64).round() as u64)
}
