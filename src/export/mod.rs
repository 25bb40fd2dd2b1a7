//! Raw-field extraction to CSV.
//!
//! This is the boundary where decoded flow rows leave the pipeline for
//! downstream feature engineering.

pub mod table;

pub use table::{
    export_stream, extraction_spec, CsvLayout, ExportSummary, FlowTableWriter,
    EXTRACTION_VARIABLES, INDEX_COLUMN,
};
