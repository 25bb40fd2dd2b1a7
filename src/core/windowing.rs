//! Partitioning a flow store's time span into uniform query slices.
//!
//! Slices have a fixed length and are spaced by a fixed stride. The stride
//! may be longer than the slice (sampling) or shorter (overlap).

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;

use crate::error::{Error, Result};

/// Timestamp format nfdump accepts for `-t`.
pub const TIME_RANGE_FORMAT: &str = "%Y/%m/%d.%H:%M:%S";

/// `start-end` in nfdump `-t` syntax.
pub fn time_range(start: NaiveDateTime, end: NaiveDateTime) -> String {
    format!(
        "{}-{}",
        start.format(TIME_RANGE_FORMAT),
        end.format(TIME_RANGE_FORMAT)
    )
}

/// One bounded sub-interval of the full span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlice {
    /// Start time of the slice
    pub start: NaiveDateTime,
    /// End time of the slice
    pub end: NaiveDateTime,
}

impl TimeSlice {
    /// Create a slice starting at the given time.
    pub fn new(start: NaiveDateTime, length: Duration) -> Self {
        Self {
            start,
            end: start + length,
        }
    }

    /// Check if a timestamp falls within this slice.
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Get the duration of this slice in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }

    /// The slice in nfdump `-t` syntax.
    pub fn time_range(&self) -> String {
        time_range(self.start, self.end)
    }
}

/// Number of slices for a span: `max(0, ceil((span - length) / stride))`.
///
/// All arguments are in milliseconds; `stride_ms` must be positive.
pub fn slice_count(span_ms: i64, length_ms: i64, stride_ms: i64) -> usize {
    let excess = span_ms - length_ms;
    if excess <= 0 || stride_ms <= 0 {
        return 0;
    }
    ((excess + stride_ms - 1) / stride_ms) as usize
}

/// Computes the slice sequence for one span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindowSlicer {
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    length: Duration,
    stride: Duration,
    count: usize,
}

impl TimeWindowSlicer {
    /// Create a slicer over `[window_start, window_end]`.
    pub fn new(
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
        length: Duration,
        stride: Duration,
    ) -> Result<Self> {
        let length_ms = length.num_milliseconds();
        let stride_ms = stride.num_milliseconds();

        if length_ms <= 0 {
            return Err(Error::InvalidWindow(format!(
                "window length must be positive, got {length_ms}ms"
            )));
        }
        if stride_ms <= 0 {
            return Err(Error::InvalidWindow(format!(
                "stride must be positive, got {stride_ms}ms"
            )));
        }

        let span_ms = (window_end - window_start).num_milliseconds();

        Ok(Self {
            window_start,
            window_end,
            length,
            stride,
            count: slice_count(span_ms, length_ms, stride_ms),
        })
    }

    /// Create a slicer from `std` durations, as stored in configuration.
    pub fn from_std(
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
        length: std::time::Duration,
        stride: std::time::Duration,
    ) -> Result<Self> {
        let convert = |d: std::time::Duration| {
            Duration::from_std(d).map_err(|e| Error::InvalidWindow(e.to_string()))
        };
        Self::new(window_start, window_end, convert(length)?, convert(stride)?)
    }

    /// Number of slices this slicer produces.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn window_start(&self) -> NaiveDateTime {
        self.window_start
    }

    pub fn window_end(&self) -> NaiveDateTime {
        self.window_end
    }

    pub fn length(&self) -> Duration {
        self.length
    }

    pub fn stride(&self) -> Duration {
        self.stride
    }

    /// The `index`-th slice, if it exists.
    pub fn slice(&self, index: usize) -> Option<TimeSlice> {
        if index >= self.count {
            return None;
        }
        let offset = Duration::milliseconds(self.stride.num_milliseconds() * index as i64);
        Some(TimeSlice::new(self.window_start + offset, self.length))
    }

    /// Lazily iterate the slices in increasing start order.
    pub fn iter(&self) -> TimeSlices {
        TimeSlices {
            slicer: *self,
            next: 0,
        }
    }
}

impl IntoIterator for &TimeWindowSlicer {
    type Item = TimeSlice;
    type IntoIter = TimeSlices;

    fn into_iter(self) -> TimeSlices {
        self.iter()
    }
}

/// Iterator over the slices of a [`TimeWindowSlicer`].
#[derive(Debug, Clone)]
pub struct TimeSlices {
    slicer: TimeWindowSlicer,
    next: usize,
}

impl Iterator for TimeSlices {
    type Item = TimeSlice;

    fn next(&mut self) -> Option<TimeSlice> {
        let slice = self.slicer.slice(self.next)?;
        self.next += 1;
        Some(slice)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.slicer.count.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TimeSlices {}

impl FusedIterator for TimeSlices {}

/// Slices of `[window_start, window_end]`; see [`TimeWindowSlicer`].
pub fn slices(
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    length: Duration,
    stride: Duration,
) -> Result<TimeSlices> {
    Ok(TimeWindowSlicer::new(window_start, window_end, length, stride)?.iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_slice_creation() {
        let start = at("2024-01-01 00:00:00");
        let slice = TimeSlice::new(start, Duration::seconds(60));

        assert_eq!(slice.end, at("2024-01-01 00:01:00"));
        assert_eq!(slice.duration_secs(), 60.0);
        assert_eq!(
            slice.time_range(),
            "2024/01/01.00:00:00-2024/01/01.00:01:00"
        );
    }

    #[test]
    fn test_slice_contains() {
        let start = at("2024-01-01 00:00:00");
        let slice = TimeSlice::new(start, Duration::seconds(10));

        assert!(slice.contains(start));
        assert!(slice.contains(start + Duration::seconds(5)));
        assert!(!slice.contains(start + Duration::seconds(10)));
        assert!(!slice.contains(start - Duration::seconds(1)));
    }

    #[test]
    fn test_ten_minute_span_sampled_every_five() {
        let slicer = TimeWindowSlicer::new(
            at("2024-01-01 00:00:00"),
            at("2024-01-01 00:10:00"),
            Duration::seconds(60),
            Duration::seconds(300),
        )
        .unwrap();

        let slices: Vec<TimeSlice> = slicer.iter().collect();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].start, at("2024-01-01 00:00:00"));
        assert_eq!(slices[0].end, at("2024-01-01 00:01:00"));
        assert_eq!(slices[1].start, at("2024-01-01 00:05:00"));
        assert_eq!(slices[1].end, at("2024-01-01 00:06:00"));
    }

    #[test]
    fn test_count_formula() {
        // ceil((S - L) / stride), clamped at zero
        assert_eq!(slice_count(600_000, 60_000, 300_000), 2);
        assert_eq!(slice_count(600_000, 60_000, 270_000), 2);
        assert_eq!(slice_count(600_000, 60_000, 180_000), 3);
        assert_eq!(slice_count(600_000, 1_000, 60_000), 10);
        assert_eq!(slice_count(600_000, 600_000, 60_000), 0);
        assert_eq!(slice_count(600_000, 900_000, 60_000), 0);
        assert_eq!(slice_count(0, 1_000, 1_000), 0);
    }

    #[test]
    fn test_slice_properties_hold_across_parameters() {
        let start = at("2024-03-01 12:00:00");
        for span in [0i64, 1, 59, 60, 61, 599, 600, 3_601] {
            for length in [1i64, 7, 60, 600] {
                for stride in [1i64, 5, 60, 301] {
                    let slicer = TimeWindowSlicer::new(
                        start,
                        start + Duration::seconds(span),
                        Duration::seconds(length),
                        Duration::seconds(stride),
                    )
                    .unwrap();

                    let expected = if span > length {
                        ((span - length) + stride - 1) / stride
                    } else {
                        0
                    };
                    let slices: Vec<TimeSlice> = slicer.iter().collect();
                    assert_eq!(slices.len() as i64, expected, "S={span} L={length} d={stride}");

                    for slice in &slices {
                        assert_eq!(slice.end - slice.start, Duration::seconds(length));
                    }
                    for pair in slices.windows(2) {
                        assert_eq!(pair[1].start - pair[0].start, Duration::seconds(stride));
                    }
                    if let Some(first) = slices.first() {
                        assert_eq!(first.start, start);
                    }
                }
            }
        }
    }

    #[test]
    fn test_last_slice_bounds() {
        let start = at("2024-01-01 00:00:00");
        let end = at("2024-01-01 00:10:00");
        let slicer =
            TimeWindowSlicer::new(start, end, Duration::seconds(60), Duration::seconds(270))
                .unwrap();
        let last = slicer.iter().last().unwrap();
        assert_eq!(last.start, at("2024-01-01 00:04:30"));
        assert!(last.end <= end);

        let slicer =
            TimeWindowSlicer::new(start, end, Duration::seconds(120), Duration::seconds(500))
                .unwrap();
        let last = slicer.iter().last().unwrap();
        assert_eq!(last.start, start);
        assert_eq!(slicer.count(), 1);
    }

    #[test]
    fn test_rejects_non_positive_parameters() {
        let start = at("2024-01-01 00:00:00");
        let end = at("2024-01-01 00:10:00");
        assert!(matches!(
            TimeWindowSlicer::new(start, end, Duration::zero(), Duration::seconds(1)),
            Err(Error::InvalidWindow(_))
        ));
        assert!(matches!(
            TimeWindowSlicer::new(start, end, Duration::seconds(1), Duration::seconds(-5)),
            Err(Error::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_iterator_is_exact_and_fused() {
        let mut iter = slices(
            at("2024-01-01 00:00:00"),
            at("2024-01-01 00:01:00"),
            Duration::seconds(10),
            Duration::seconds(10),
        )
        .unwrap();

        assert_eq!(iter.len(), 5);
        iter.next();
        assert_eq!(iter.len(), 4);
        let rest: Vec<_> = iter.by_ref().collect();
        assert_eq!(rest.len(), 4);
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_from_std_durations() {
        let slicer = TimeWindowSlicer::from_std(
            at("2024-01-01 00:00:00"),
            at("2024-01-01 00:10:00"),
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(slicer.count(), 10);
        assert_eq!(slicer.slice(9).unwrap().start, at("2024-01-01 00:09:00"));
        assert!(slicer.slice(10).is_none());
    }
}
