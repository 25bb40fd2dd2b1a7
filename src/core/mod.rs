//! Flow store access.
//!
//! This module contains:
//! - Time slicing of a store's full window
//! - Parsing of the nfdump summary footer
//! - Store discovery and volume queries
//! - Lazy slice-by-slice streaming and row decoding

pub mod store;
pub mod stream;
pub mod summary;
pub mod windowing;

pub use store::FlowStore;
pub use stream::{decode_rows, FlowRow, FlowStreamer, SliceBatch};
pub use summary::{parse_full_window, parse_volume, parse_volume_unit, parse_volumes, Volumes};
pub use windowing::{slices, time_range, TimeSlice, TimeSlices, TimeWindowSlicer};
