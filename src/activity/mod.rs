//! Activity tracking for flowslice.
//!
//! Counts what the pipeline has done across runs so `flowslice status` can
//! report it.

pub mod log;

// Re-export commonly used types
pub use log::{ActivityLog, ActivityStats};
