//! Error types for flowslice.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for acquisition operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Capture input path does not exist
    #[error("Input not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    /// External process could not be launched
    #[error("Failed to start {program}: {source}")]
    ProcessStart {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// External process exited unsuccessfully
    #[error("{program} exited with {}: {}", code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")), stderr.trim())]
    ProcessExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// External process exceeded its deadline and was killed
    #[error("{program} timed out after {}s", timeout.as_secs())]
    Timeout {
        program: String,
        timeout: std::time::Duration,
    },

    /// Call was cancelled by the caller
    #[error("{program} was cancelled")]
    Cancelled { program: String },

    /// No rotated file to move into place
    #[error("No flow file produced in {}", dir.display())]
    RenameFailure { dir: PathBuf },

    /// Unrecognized variable, aggregator, unit or filter name
    #[error("Unknown {kind}: '{symbol}'")]
    UnknownSymbol { kind: &'static str, symbol: String },

    /// Summary footer missing or unparsable
    #[error("Malformed summary ({reason}): '{line}'")]
    MalformedSummary { line: String, reason: String },

    /// Window length or stride is not positive
    #[error("Invalid time window: {0}")]
    InvalidWindow(String),

    /// Configuration could not be loaded or saved
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Whether the error is the non-fatal "nothing to capture" case.
    pub fn is_input_not_found(&self) -> bool {
        matches!(self, Error::InputNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_symbol_names_offender() {
        let err = Error::UnknownSymbol {
            kind: "unit",
            symbol: "FURLONGS".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown unit: 'FURLONGS'");
    }

    #[test]
    fn test_process_exit_message() {
        let err = Error::ProcessExit {
            program: "softflowd".to_string(),
            code: Some(2),
            stderr: "bad pcap\n".to_string(),
        };
        assert_eq!(err.to_string(), "softflowd exited with code 2: bad pcap");

        let err = Error::ProcessExit {
            program: "nfdump".to_string(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("signal"));
    }
}
