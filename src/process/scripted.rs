//! Scripted process runner.
//!
//! Records every invocation and answers with pre-arranged outputs instead of
//! touching the operating system. Used to exercise capture orchestration and
//! streaming on machines without nfdump tooling installed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::command::{CommandSpec, ProcessOutput, RunOptions};
use super::runner::ProcessRunner;
use crate::error::{Error, Result};

/// One call observed by a [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(CommandSpec),
    Spawn(CommandSpec),
    Kill(String),
}

#[derive(Debug, Default)]
struct Script {
    invocations: Vec<Invocation>,
    queued: HashMap<String, VecDeque<ProcessOutput>>,
    fallback: HashMap<String, ProcessOutput>,
    unstartable: HashSet<String>,
    unkillable: HashSet<String>,
    lingering: HashSet<String>,
    spawn_files: HashMap<String, Vec<(PathBuf, Vec<u8>)>>,
}

/// A cloneable runner whose clones share one script and one call log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer the next run of `program` with `output`.
    ///
    /// Queued outputs are consumed in order before the fallback is used.
    pub fn respond(&self, program: &str, output: ProcessOutput) -> &Self {
        self.script()
            .queued
            .entry(program.to_string())
            .or_default()
            .push_back(output);
        self
    }

    /// Answer every unqueued run of `program` with `output`.
    pub fn respond_always(&self, program: &str, output: ProcessOutput) -> &Self {
        self.script().fallback.insert(program.to_string(), output);
        self
    }

    /// Make runs and spawns of `program` fail as if it were not installed.
    pub fn fail_to_start(&self, program: &str) -> &Self {
        self.script().unstartable.insert(program.to_string());
        self
    }

    /// Make termination of `name` fail as if `pkill` had errored.
    pub fn fail_to_kill(&self, name: &str) -> &Self {
        self.script().unkillable.insert(name.to_string());
        self
    }

    /// Keep counting `name` as running after it has been signalled.
    pub fn linger_after_kill(&self, name: &str) -> &Self {
        self.script().lingering.insert(name.to_string());
        self
    }

    /// Write `contents` to `path` whenever `program` is spawned, standing in
    /// for a daemon producing its output file.
    pub fn write_on_spawn(&self, program: &str, path: impl AsRef<Path>, contents: &[u8]) -> &Self {
        self.script()
            .spawn_files
            .entry(program.to_string())
            .or_default()
            .push((path.as_ref().to_path_buf(), contents.to_vec()));
        self
    }

    /// All calls in the order they were made.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.script().invocations.clone()
    }

    /// Synchronous runs of `program`.
    pub fn runs_of(&self, program: &str) -> Vec<CommandSpec> {
        self.script()
            .invocations
            .iter()
            .filter_map(|inv| match inv {
                Invocation::Run(cmd) if cmd.program == program => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Detached spawns of `program`.
    pub fn spawns_of(&self, program: &str) -> Vec<CommandSpec> {
        self.script()
            .invocations
            .iter()
            .filter_map(|inv| match inv {
                Invocation::Spawn(cmd) if cmd.program == program => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// How many times `name` was terminated by name.
    pub fn kill_count(&self, name: &str) -> usize {
        self.script()
            .invocations
            .iter()
            .filter(|inv| matches!(inv, Invocation::Kill(n) if n == name))
            .count()
    }

    fn start_error(program: &str) -> Error {
        Error::ProcessStart {
            program: program.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "scripted start failure"),
        }
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, command: &CommandSpec, options: &RunOptions) -> Result<ProcessOutput> {
        let mut script = self.script();
        script.invocations.push(Invocation::Run(command.clone()));

        if options.is_cancelled() {
            return Err(Error::Cancelled {
                program: command.program.clone(),
            });
        }
        if script.unstartable.contains(&command.program) {
            return Err(Self::start_error(&command.program));
        }

        let queued = script
            .queued
            .get_mut(&command.program)
            .and_then(VecDeque::pop_front);

        Ok(queued
            .or_else(|| script.fallback.get(&command.program).cloned())
            .unwrap_or_else(|| ProcessOutput::success(Vec::new())))
    }

    fn spawn_detached(&self, command: &CommandSpec) -> Result<u32> {
        let mut script = self.script();
        script.invocations.push(Invocation::Spawn(command.clone()));

        if script.unstartable.contains(&command.program) {
            return Err(Self::start_error(&command.program));
        }
        if let Some(files) = script.spawn_files.get(&command.program) {
            for (path, contents) in files {
                std::fs::write(path, contents)?;
            }
        }
        Ok(script.invocations.len() as u32)
    }

    fn kill_by_name(&self, name: &str) -> Result<bool> {
        let mut script = self.script();
        script.invocations.push(Invocation::Kill(name.to_string()));

        if script.unkillable.contains(name) {
            return Err(Error::ProcessExit {
                program: "pkill".to_string(),
                code: Some(3),
                stderr: format!("scripted failure terminating {name}"),
            });
        }
        Ok(true)
    }

    /// Spawns of `name` since it was last terminated by name.
    fn count_by_name(&self, name: &str) -> Result<usize> {
        let script = self.script();
        let since_kill = if script.lingering.contains(name) {
            0
        } else {
            script
                .invocations
                .iter()
                .rposition(|inv| matches!(inv, Invocation::Kill(n) if n == name))
                .map_or(0, |i| i + 1)
        };

        Ok(script.invocations[since_kill..]
            .iter()
            .filter(|inv| matches!(inv, Invocation::Spawn(cmd) if cmd.program == name))
            .count())
    }
}
