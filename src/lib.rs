//! flowslice - packet captures to time-sliced NetFlow queries.
//!
//! This library turns raw packet captures into an nfdump flow store and then
//! serves lazily evaluated, time-windowed queries over that store.
//!
//! # Pipeline
//!
//! - **Capture**: replay pcaps through softflowd into a detached nfcapd, then
//!   move the rotated output into place under a canonical name
//! - **Discover**: read the store's full time window from nfdump's summary
//! - **Slice**: split the window into fixed-length slices spaced by a stride
//! - **Stream**: run one nfdump query per slice, on demand
//! - **Extract**: decode rows and write them to CSV
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            flowslice                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐             │
//! │  │   Capture   │──▶│  FlowStore  │──▶│  Windowing  │             │
//! │  │  (nfcapd +  │   │ (discovery) │   │  (slicer)   │             │
//! │  │  softflowd) │   └─────────────┘   └─────────────┘             │
//! │  └─────────────┘          │                 │                    │
//! │         │                 ▼                 ▼                    │
//! │         │          ┌─────────────┐   ┌─────────────┐             │
//! │         │          │    Query    │──▶│  Streamer   │──▶ CSV      │
//! │         │          │  (builder)  │   │  (nfdump)   │             │
//! │         ▼          └─────────────┘   └─────────────┘             │
//! │  ┌─────────────────────────────────────────────────┐             │
//! │  │        ProcessRunner (system | scripted)        │             │
//! │  └─────────────────────────────────────────────────┘             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use flowslice::core::FlowStore;
//! use flowslice::process::{RunOptions, SystemRunner};
//! use flowslice::query::{Filter, QuerySpec, Variable};
//!
//! let runner = SystemRunner::new();
//! let store = FlowStore::open(&runner, "nfdump", "./nfdumps/sample_file", &RunOptions::default())?;
//!
//! let spec = QuerySpec::new()
//!     .with_variables([Variable::Protocol, Variable::Bytes])
//!     .with_filter(Filter::Protocol, "tcp");
//!
//! let stream = store.stream(
//!     &runner,
//!     &spec,
//!     Duration::from_secs(1),
//!     Duration::from_secs(60),
//!     RunOptions::default(),
//! )?;
//! for batch in stream {
//!     let batch = batch?;
//!     println!("{}: {} rows", batch.start(), batch.decode().len());
//! }
//! # Ok::<(), flowslice::Error>(())
//! ```

pub mod activity;
pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod export;
pub mod process;
pub mod query;

// Re-export key types at crate root for convenience
pub use activity::{ActivityLog, ActivityStats};
pub use capture::{CaptureJob, CaptureOrchestrator, CaptureOutcome, CaptureProgress, InputOrder};
pub use config::Config;
pub use core::{FlowRow, FlowStore, FlowStreamer, SliceBatch, TimeSlice, TimeWindowSlicer};
pub use error::{Error, Result};
pub use export::{CsvLayout, FlowTableWriter};
pub use process::{CancelToken, ProcessRunner, RunOptions, ScriptedRunner, SystemRunner};
pub use query::{QueryBuilder, QuerySpec};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
