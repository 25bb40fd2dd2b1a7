//! Packet capture to flow store conversion.
//!
//! A [`CaptureOrchestrator`] drives the external capture daemon (nfcapd) and
//! export utility (softflowd) through one [`CaptureJob`], reporting progress
//! through a shared [`CaptureProgress`] that callers may poll.

pub mod job;
pub mod orchestrator;
pub mod progress;

pub use job::{CaptureJob, InputOrder};
pub use orchestrator::{latest_file, CaptureOrchestrator, CaptureOutcome, CaptureTools};
pub use progress::{CaptureProgress, CaptureState, ProgressSnapshot, SharedCaptureProgress};
