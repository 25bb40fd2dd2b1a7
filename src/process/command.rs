//! Command descriptions and call options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// A program plus its argument list, independent of how it is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Build from a full argument vector whose first element is the program.
    ///
    /// Returns `None` for an empty vector.
    pub fn from_argv(argv: Vec<String>) -> Option<Self> {
        let mut iter = argv.into_iter();
        let program = iter.next()?;
        Some(Self {
            program,
            args: iter.collect(),
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') || arg.is_empty() {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Which long-lived tool a terminate-by-name targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessKind {
    CaptureDaemon,
    ExportUtility,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::CaptureDaemon => write!(f, "capture daemon"),
            ProcessKind::ExportUtility => write!(f, "export utility"),
        }
    }
}

/// Captured result of a synchronous call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    /// A successful output carrying `stdout`.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// A failed output with the given exit code and stderr.
    pub fn failure(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Standard output decoded as UTF-8 (lossy).
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Turn a non-zero exit into [`Error::ProcessExit`].
    pub fn check(self, program: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::ProcessExit {
                program: program.to_string(),
                code: self.code,
                stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            })
        }
    }
}

/// Cooperative cancellation flag shared between a caller and a running call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Options for a synchronous call.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Kill the child and fail with [`Error::Timeout`] after this long
    pub timeout: Option<Duration>,
    /// Kill the child and fail with [`Error::Cancelled`] once set
    pub cancel: Option<CancelToken>,
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_spaced_args() {
        let cmd = CommandSpec::new("nfdump")
            .args(["-r", "/tmp/flows", "-q"])
            .arg("proto tcp and dst port 80");
        assert_eq!(
            cmd.to_string(),
            "nfdump -r /tmp/flows -q \"proto tcp and dst port 80\""
        );
    }

    #[test]
    fn test_from_argv() {
        let cmd = CommandSpec::from_argv(vec!["pkill".into(), "nfcapd".into()]).unwrap();
        assert_eq!(cmd.program, "pkill");
        assert_eq!(cmd.args, vec!["nfcapd"]);
        assert_eq!(cmd.argv(), vec!["pkill", "nfcapd"]);
        assert!(CommandSpec::from_argv(Vec::new()).is_none());
    }

    #[test]
    fn test_check_maps_failure() {
        let ok = ProcessOutput::success("data").check("nfdump").unwrap();
        assert_eq!(ok.stdout_text(), "data");

        let err = ProcessOutput::failure(255, "Error: no file").check("nfdump");
        assert!(matches!(err, Err(Error::ProcessExit { code: Some(255), .. })));
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let options = RunOptions::default().with_cancel(token.clone());
        assert!(!options.is_cancelled());
        token.cancel();
        assert!(options.is_cancelled());
    }
}
