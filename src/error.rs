//! Error type shared by every harness operation

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can fail a test from inside the harness.
///
/// All variants are fatal for the calling test. The only failures the
/// harness swallows are teardown errors, which are logged instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("path '{}' escapes the workspace root", .0.display())]
    InvalidPath(PathBuf),

    #[error("artifact '{0}' not found in runfiles")]
    ArtifactNotFound(String),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch `{command}` in '{}': {source}", cwd.display())]
    ProcessLaunch {
        command: String,
        cwd: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "`{command}` exited with {actual}, expected {expected}\n\
         --- stdout ---\n{stdout}\n--- stderr ---\n{stderr}"
    )]
    UnexpectedExitCode {
        command: String,
        expected: i32,
        actual: i32,
        stdout: String,
        stderr: String,
    },

    #[error("environment error: {0}")]
    Environment(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl HarnessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
