//! Host shell transport.
//!
//! `execute` goes through the platform shell so operators can use pipes
//! and globs in kill/query commands. `spawn` splits the template on
//! whitespace and launches the executable directly, resolving it against
//! `PATH` first and the configured tool directory second.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::error::TransportError;
use crate::process::{self, CapturedOutput, ChildProcess, ProcessHandle};
use crate::Transport;

/// Budget for `execute` when the caller gives none.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct LocalShell {
    tool_path: Option<PathBuf>,
}

impl LocalShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fall back to `dir` when an executable is not found on `PATH`.
    pub fn with_tool_path(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            tool_path: (!dir.as_os_str().is_empty()).then_some(dir),
        }
    }

    /// Launch an argument vector with piped output.
    pub fn spawn_argv(&self, argv: &[String]) -> Result<Box<dyn ProcessHandle>, TransportError> {
        let (exe, args) = argv.split_first().ok_or(TransportError::EmptyCommand)?;
        let exe = self.resolve_executable(exe);
        tracing::debug!(exe = %exe.display(), ?args, "spawning host process");
        let child = Command::new(&exe)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: argv.join(" "),
                source,
            })?;
        Ok(Box::new(ChildProcess::new(child)))
    }

    /// Run an argument vector to completion within `timeout`.
    pub fn run_argv(&self, argv: &[String], timeout: Duration) -> Result<CapturedOutput, TransportError> {
        let handle = self.spawn_argv(argv)?;
        Ok(process::capture(handle, timeout)?)
    }

    /// Run `command` through the platform shell.
    pub fn run_shell(&self, command: &str, timeout: Duration) -> Result<CapturedOutput, TransportError> {
        if command.trim().is_empty() {
            return Err(TransportError::EmptyCommand);
        }
        let mut cmd = shell_command(command);
        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: command.to_string(),
                source,
            })?;
        Ok(process::capture(Box::new(ChildProcess::new(child)), timeout)?)
    }

    fn resolve_executable(&self, exe: &str) -> PathBuf {
        if exe.contains('/') || exe.contains('\\') {
            return PathBuf::from(exe);
        }
        if find_on_path(exe).is_some() {
            return PathBuf::from(exe);
        }
        if let Some(dir) = &self.tool_path {
            if let Some(found) = candidate_in(dir, exe) {
                return found;
            }
        }
        PathBuf::from(exe)
    }
}

impl Transport for LocalShell {
    fn name(&self) -> &str {
        "host"
    }

    fn execute(&mut self, command: &str, timeout: Option<Duration>) -> Option<String> {
        match self.run_shell(command, timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT)) {
            Ok(output) => Some(output.combined()),
            Err(e) => {
                tracing::warn!(command, error = %e, "host command failed");
                None
            }
        }
    }

    fn spawn(&mut self, command: &str) -> Result<Box<dyn ProcessHandle>, TransportError> {
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        self.spawn_argv(&argv)
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

fn find_on_path(exe: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| candidate_in(&dir, exe))
}

fn candidate_in(dir: &Path, exe: &str) -> Option<PathBuf> {
    let candidate = dir.join(exe);
    if candidate.is_file() {
        return Some(candidate);
    }
    if cfg!(windows) && !exe.to_ascii_lowercase().ends_with(".exe") {
        let with_ext = dir.join(format!("{exe}.exe"));
        if with_ext.is_file() {
            return Some(with_ext);
        }
    }
    None
}
