//! Lifecycle of the capture daemon and export utility.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use super::job::CaptureJob;
use super::progress::{CaptureProgress, CaptureState, SharedCaptureProgress};
use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::process::{CancelToken, CommandSpec, ProcessKind, ProcessRunner, RunOptions};

/// Upper bound on waiting for both tools to exit once signalled.
const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(10);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Kernel file timestamps can trail the wall clock slightly.
const TIMESTAMP_SLACK: Duration = Duration::from_secs(1);

/// Names of the two long-lived tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTools {
    pub daemon: String,
    pub exporter: String,
}

impl CaptureTools {
    pub fn name(&self, kind: ProcessKind) -> &str {
        match kind {
            ProcessKind::CaptureDaemon => &self.daemon,
            ProcessKind::ExportUtility => &self.exporter,
        }
    }
}

impl Default for CaptureTools {
    fn default() -> Self {
        Self::from(&ToolConfig::default())
    }
}

impl From<&ToolConfig> for CaptureTools {
    fn from(tools: &ToolConfig) -> Self {
        Self {
            daemon: tools.daemon.clone(),
            exporter: tools.exporter.clone(),
        }
    }
}

/// Result of a capture job that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The flow store was written to `store`
    Completed { store: PathBuf, processed: usize },
    /// The input path does not exist; nothing was started
    NoInput { path: PathBuf },
}

impl CaptureOutcome {
    pub fn processed(&self) -> usize {
        match self {
            CaptureOutcome::Completed { processed, .. } => *processed,
            CaptureOutcome::NoInput { .. } => 0,
        }
    }

    pub fn store(&self) -> Option<&Path> {
        match self {
            CaptureOutcome::Completed { store, .. } => Some(store),
            CaptureOutcome::NoInput { .. } => None,
        }
    }
}

/// Runs capture jobs one at a time.
pub struct CaptureOrchestrator<R: ProcessRunner> {
    runner: R,
    tools: CaptureTools,
    progress: SharedCaptureProgress,
    settle_time: Duration,
    exit_timeout: Duration,
    export_timeout: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl<R: ProcessRunner> CaptureOrchestrator<R> {
    pub fn new(runner: R, tools: CaptureTools) -> Self {
        Self {
            runner,
            tools,
            progress: CaptureProgress::shared(),
            settle_time: Duration::ZERO,
            exit_timeout: DEFAULT_EXIT_TIMEOUT,
            export_timeout: None,
            cancel: None,
        }
    }

    /// Report into an existing progress record instead of a private one.
    pub fn with_progress(mut self, progress: SharedCaptureProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Pause after stopping the daemon so it can close its last file.
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// How long to wait for both tools to disappear after signalling them.
    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }

    pub fn with_export_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.export_timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn progress(&self) -> SharedCaptureProgress {
        self.progress.clone()
    }

    /// `nfcapd -t <rotation> -l <output_dir> -p <port>`
    pub fn daemon_command(&self, job: &CaptureJob) -> CommandSpec {
        CommandSpec::new(&self.tools.daemon).args([
            "-t".to_string(),
            job.rotation_interval.as_secs().to_string(),
            "-l".to_string(),
            job.output_dir.to_string_lossy().into_owned(),
            "-p".to_string(),
            job.collector_port.to_string(),
        ])
    }

    /// `softflowd -r <input> -n <address>:<port>`
    pub fn export_command(&self, job: &CaptureJob, input: &Path) -> CommandSpec {
        CommandSpec::new(&self.tools.exporter).args([
            "-r".to_string(),
            input.to_string_lossy().into_owned(),
            "-n".to_string(),
            job.endpoint(),
        ])
    }

    /// Convert every input of `job` into one flow store.
    ///
    /// A missing input is reported as [`CaptureOutcome::NoInput`]. On any
    /// failure both tools are still terminated and the error is recorded in
    /// the progress record before it is returned.
    pub fn run(&self, job: &CaptureJob) -> Result<CaptureOutcome> {
        let inputs = match job.inputs() {
            Ok(inputs) => inputs,
            Err(Error::InputNotFound { path }) => {
                info!(job = %job.id, input = %path.display(), "no capture input, nothing to do");
                return Ok(CaptureOutcome::NoInput { path });
            }
            Err(e) => return Err(e),
        };

        info!(
            job = %job.id,
            inputs = inputs.len(),
            output = %job.output_path().display(),
            "starting capture"
        );
        self.progress.begin(inputs.len());

        let result = self.capture(job, &inputs);
        match &result {
            Ok(outcome) => {
                self.progress.set_state(
                    CaptureState::Idle,
                    format!("Capture finished: {} file(s)", outcome.processed()),
                );
                info!(job = %job.id, processed = outcome.processed(), "capture finished");
            }
            Err(e) => {
                self.progress.record_error(e);
                warn!(job = %job.id, error = %e, "capture failed");
            }
        }
        self.progress.finish();
        result
    }

    fn capture(&self, job: &CaptureJob, inputs: &[PathBuf]) -> Result<CaptureOutcome> {
        std::fs::create_dir_all(&job.output_dir)?;

        let mut guard = ProcessGuard::new(&self.runner, &self.tools);

        let started = SystemTime::now();
        let daemon = self.daemon_command(job);
        let pid = self.runner.spawn_detached(&daemon)?;
        debug!(job = %job.id, pid, command = %daemon, "daemon started");

        let mut options = RunOptions::default().with_timeout(self.export_timeout);
        if let Some(token) = &self.cancel {
            options = options.with_cancel(token.clone());
        }

        for input in inputs {
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.progress
                .set_state(CaptureState::Exporting, format!("Replaying {name}"));

            self.runner
                .run_checked(&self.export_command(job, input), &options)?;

            let processed = self.progress.increment_processed();
            debug!(job = %job.id, input = %input.display(), processed, "capture replayed");
        }

        self.progress
            .set_state(CaptureState::Finalizing, "Stopping capture tools");
        guard.terminate()?;
        self.wait_for_exit()?;

        if !self.settle_time.is_zero() {
            std::thread::sleep(self.settle_time);
        }

        let store = job.output_path();
        let since = started.checked_sub(TIMESTAMP_SLACK).unwrap_or(started);
        let latest = latest_file(&job.output_dir, &store, since)?.ok_or_else(|| {
            Error::RenameFailure {
                dir: job.output_dir.clone(),
            }
        })?;
        std::fs::rename(&latest, &store)?;
        info!(from = %latest.display(), to = %store.display(), "flow store in place");

        Ok(CaptureOutcome::Completed {
            store,
            processed: self.progress.processed(),
        })
    }

    /// Poll until neither tool is running, failing with
    /// [`Error::Timeout`] once `exit_timeout` has passed.
    fn wait_for_exit(&self) -> Result<()> {
        let deadline = Instant::now() + self.exit_timeout;

        loop {
            let mut running = None;
            for kind in [ProcessKind::CaptureDaemon, ProcessKind::ExportUtility] {
                let name = self.tools.name(kind);
                if self.runner.count_by_name(name)? > 0 {
                    running = Some(name);
                    break;
                }
            }

            let Some(name) = running else {
                return Ok(());
            };
            if Instant::now() >= deadline {
                warn!(process = name, "still running after termination");
                return Err(Error::Timeout {
                    program: name.to_string(),
                    timeout: self.exit_timeout,
                });
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

/// Terminates both tools by name exactly once, at the latest on drop.
struct ProcessGuard<'a, R: ProcessRunner> {
    runner: &'a R,
    tools: &'a CaptureTools,
    terminated: bool,
}

impl<'a, R: ProcessRunner> ProcessGuard<'a, R> {
    fn new(runner: &'a R, tools: &'a CaptureTools) -> Self {
        Self {
            runner,
            tools,
            terminated: false,
        }
    }

    /// Signal both tools. Both are attempted even if the first fails; the
    /// first failure is returned.
    fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        let mut failure = None;
        for kind in [ProcessKind::CaptureDaemon, ProcessKind::ExportUtility] {
            let name = self.tools.name(kind);
            match self.runner.kill_by_name(name) {
                Ok(true) => debug!(process = name, %kind, "terminated"),
                Ok(false) => debug!(process = name, %kind, "was not running"),
                Err(e) => {
                    warn!(process = name, %kind, error = %e, "failed to terminate");
                    failure.get_or_insert(e);
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

impl<R: ProcessRunner> Drop for ProcessGuard<'_, R> {
    fn drop(&mut self) {
        // already logged; a failed job keeps its original error
        let _ = self.terminate();
    }
}

/// Most recently created regular file in `dir` written to at or after
/// `since`.
///
/// Skips `exclude`, hidden files and nfcapd's in-progress `*.current.*`
/// files. Falls back to the modification time where creation time is
/// unavailable.
pub fn latest_file(dir: &Path, exclude: &Path, since: SystemTime) -> Result<Option<PathBuf>> {
    let mut latest: Option<(SystemTime, PathBuf)> = None;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name.contains(".current.") || path == exclude {
            continue;
        }

        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;
        if modified < since {
            debug!(file = %path.display(), "skipping file from an earlier run");
            continue;
        }
        let created = metadata.created().unwrap_or(modified);

        if latest.as_ref().map_or(true, |(t, _)| created >= *t) {
            latest = Some((created, path));
        }
    }

    Ok(latest.map(|(_, path)| path))
}
