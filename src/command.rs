//! One invocation of the build binary, built fluently and then executed

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::{HarnessError, Result};
use crate::fs_utils::resolve_within;

/// An invocation of the build binary bound to a workspace.
///
/// Builder methods consume and return the command; the execution methods
/// borrow it, so the same command can be run more than once and every run
/// sees exactly the same program, arguments, directory and environment.
#[derive(Debug, Clone)]
pub struct BazelCommand {
    program: PathBuf,
    args: Vec<OsString>,
    workspace: PathBuf,
    working_dir: Option<PathBuf>,
    env: Vec<(OsString, Option<OsString>)>,
}

impl BazelCommand {
    pub(crate) fn new<I, S>(program: &Path, workspace: &Path, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Self {
            program: program.to_path_buf(),
            args: args.into_iter().map(|a| a.as_ref().to_os_string()).collect(),
            workspace: workspace.to_path_buf(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Run from `relative` (inside the workspace) instead of the root.
    pub fn in_working_directory(mut self, relative: impl AsRef<Path>) -> Result<Self> {
        self.working_dir = Some(resolve_within(&self.workspace, relative.as_ref())?);
        Ok(self)
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Set an environment variable for the child on top of the inherited ones.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env.push((
            key.as_ref().to_os_string(),
            Some(value.as_ref().to_os_string()),
        ));
        self
    }

    /// Hide an inherited environment variable from the child.
    pub fn env_remove(mut self, key: impl AsRef<OsStr>) -> Self {
        self.env.push((key.as_ref().to_os_string(), None));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Directory the child will start in.
    pub fn working_directory(&self) -> &Path {
        self.working_dir.as_deref().unwrap_or(&self.workspace)
    }

    /// Run and return the result whatever the exit code.
    ///
    /// Fails only when the process cannot be started. Blocks until the child
    /// exits; there is no timeout.
    pub fn run(&self) -> Result<CommandResult> {
        let cwd = self.working_directory();
        tracing::info!(command = %self, cwd = %cwd.display(), "running");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(cwd)
            .stdin(Stdio::null());
        for (key, value) in &self.env {
            match value {
                Some(value) => command.env(key, value),
                None => command.env_remove(key),
            };
        }

        let output = command.output().map_err(|source| HarnessError::ProcessLaunch {
            command: self.to_string(),
            cwd: cwd.to_path_buf(),
            source,
        })?;

        let result = CommandResult::from_output(output);
        tracing::info!(command = %self, exit_code = result.exit_code, "finished");
        Ok(result)
    }

    /// Run and require exit code 0.
    pub fn must_run_successfully(&self) -> Result<CommandResult> {
        self.must_run_and_return_exit_code(0)
    }

    /// Run and require exactly `expected` as the exit code.
    pub fn must_run_and_return_exit_code(&self, expected: i32) -> Result<CommandResult> {
        let result = self.run()?;
        if result.exit_code != expected {
            return Err(HarnessError::UnexpectedExitCode {
                command: self.to_string(),
                expected,
                actual: result.exit_code,
                stdout: result.stdout_lines.join("\n"),
                stderr: result.stderr,
            });
        }
        Ok(result)
    }
}

impl fmt::Display for BazelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured outcome of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    exit_code: i32,
    stdout_lines: Vec<String>,
    stderr: String,
}

impl CommandResult {
    fn from_output(output: Output) -> Self {
        Self {
            exit_code: exit_code(&output.status),
            stdout_lines: split_lines(&output.stdout),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Stdout, one entry per line, terminators removed.
    pub fn output_lines(&self) -> &[String] {
        &self.stdout_lines
    }

    /// Stderr, split the same way as stdout.
    pub fn error_lines(&self) -> Vec<String> {
        split_lines(self.stderr.as_bytes())
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// True if any stdout line contains `needle`.
    pub fn stdout_contains(&self, needle: &str) -> bool {
        self.stdout_lines.iter().any(|line| line.contains(needle))
    }
}

/// Split captured bytes into lines.
///
/// `\n` and `\r\n` both end a line and a final terminator does not produce
/// an empty last line. Invalid UTF-8 is replaced, not rejected.
fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

/// Exit code of the child; a signal death maps to `128 + signal`.
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
