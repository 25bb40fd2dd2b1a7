//! External process execution.
//!
//! Every interaction with nfcapd, softflowd, nfdump and pkill goes through
//! the [`ProcessRunner`] trait so that orchestration and streaming can be
//! exercised without the real tools installed.

pub mod command;
pub mod runner;
pub mod scripted;

// Re-export commonly used types
pub use command::{CancelToken, CommandSpec, ProcessKind, ProcessOutput, RunOptions};
pub use runner::{ProcessRunner, SystemRunner};
pub use scripted::{Invocation, ScriptedRunner};
