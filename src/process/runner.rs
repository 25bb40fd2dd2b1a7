//! Process runner trait and the operating-system implementation.

use crossbeam_channel::{after, bounded, never, select, tick, Receiver};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::command::{CommandSpec, ProcessOutput, RunOptions};
use crate::error::{Error, Result};

/// How often a waiting call checks its cancellation token.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Executes external commands.
pub trait ProcessRunner {
    /// Run a command to completion, capturing its output.
    ///
    /// A non-zero exit is returned as data, not as an error; use
    /// [`ProcessRunner::run_checked`] to fail on it.
    fn run(&self, command: &CommandSpec, options: &RunOptions) -> Result<ProcessOutput>;

    /// Start a command in the background and return immediately with its pid.
    fn spawn_detached(&self, command: &CommandSpec) -> Result<u32>;

    /// Signal every process with the given name.
    ///
    /// Returns `false` when no process matched.
    fn kill_by_name(&self, name: &str) -> Result<bool>;

    /// Number of running processes with the given name.
    fn count_by_name(&self, name: &str) -> Result<usize>;

    /// Run a command and fail with [`Error::ProcessExit`] on a non-zero exit.
    fn run_checked(&self, command: &CommandSpec, options: &RunOptions) -> Result<ProcessOutput> {
        self.run(command, options)?.check(&command.program)
    }
}

/// Runs commands through `std::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    kill_with_sudo: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix `pkill` with `sudo`, for daemons started by another user.
    pub fn with_sudo_kill(mut self, enabled: bool) -> Self {
        self.kill_with_sudo = enabled;
        self
    }

    fn kill_command(&self, name: &str) -> CommandSpec {
        if self.kill_with_sudo {
            CommandSpec::new("sudo").args(["pkill", name])
        } else {
            CommandSpec::new("pkill").arg(name)
        }
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &CommandSpec, options: &RunOptions) -> Result<ProcessOutput> {
        if options.is_cancelled() {
            return Err(Error::Cancelled {
                program: command.program.clone(),
            });
        }

        debug!(command = %command, "running");
        let started = Instant::now();

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::ProcessStart {
                program: command.program.clone(),
                source,
            })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait_with_deadline(&mut child, command, options)?;

        let output = ProcessOutput {
            code: status.code(),
            stdout: stdout.recv().unwrap_or_default(),
            stderr: stderr.recv().unwrap_or_default(),
        };

        debug!(
            program = %command.program,
            code = ?output.code,
            bytes = output.stdout.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "finished"
        );
        Ok(output)
    }

    fn spawn_detached(&self, command: &CommandSpec) -> Result<u32> {
        debug!(command = %command, "spawning detached");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| Error::ProcessStart {
                program: command.program.clone(),
                source,
            })?;

        let pid = child.id();

        // Reap the child once it is signalled so it does not linger as a zombie.
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        Ok(pid)
    }

    fn kill_by_name(&self, name: &str) -> Result<bool> {
        let command = self.kill_command(name);
        let output = self.run(&command, &RunOptions::default())?;

        // pkill: 0 = matched, 1 = nothing matched
        match output.code {
            Some(0) => {
                debug!(process = name, "terminated");
                Ok(true)
            }
            Some(1) => {
                debug!(process = name, "no running process to terminate");
                Ok(false)
            }
            _ => {
                warn!(process = name, code = ?output.code, "pkill failed");
                output.check(&command.program).map(|_| false)
            }
        }
    }

    fn count_by_name(&self, name: &str) -> Result<usize> {
        let command = CommandSpec::new("pgrep").args(["-c", name]);
        let output = self.run(&command, &RunOptions::default())?;

        // pgrep: 0 = matched, 1 = nothing matched (still prints 0)
        match output.code {
            Some(0) | Some(1) => Ok(output.stdout_text().trim().parse().unwrap_or(0)),
            _ => output.check(&command.program).map(|_| 0),
        }
    }
}

/// Read a pipe to the end on a helper thread.
fn drain<R>(pipe: Option<R>) -> Receiver<Vec<u8>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded(1);
    match pipe {
        Some(mut pipe) => {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                let _ = tx.send(buf);
            });
        }
        None => {
            let _ = tx.send(Vec::new());
        }
    }
    rx
}

/// Wait for the child, killing it on timeout or cancellation.
fn wait_with_deadline(
    child: &mut Child,
    command: &CommandSpec,
    options: &RunOptions,
) -> Result<ExitStatus> {
    let deadline = options.timeout.map(after).unwrap_or_else(never);
    let ticker = tick(POLL_INTERVAL);

    loop {
        let polled = child.try_wait();
        if let Some(status) = poll_or_kill(child, command, polled)? {
            return Ok(status);
        }

        select! {
            recv(ticker) -> _ => {
                if options.is_cancelled() {
                    terminate(child, command);
                    return Err(Error::Cancelled {
                        program: command.program.clone(),
                    });
                }
            }
            recv(deadline) -> _ => {
                terminate(child, command);
                return Err(Error::Timeout {
                    program: command.program.clone(),
                    timeout: options.timeout.unwrap_or_default(),
                });
            }
        }
    }
}

/// Pass a `try_wait` result through, killing the child if polling failed.
fn poll_or_kill(
    child: &mut Child,
    command: &CommandSpec,
    polled: std::io::Result<Option<ExitStatus>>,
) -> Result<Option<ExitStatus>> {
    polled.map_err(|e| {
        terminate(child, command);
        Error::Io(e)
    })
}

fn terminate(child: &mut Child, command: &CommandSpec) {
    warn!(command = %command, "killing unfinished process");
    if let Err(e) = child.kill() {
        warn!(program = %command.program, error = %e, "kill failed");
    }
    let _ = child.wait();
}
