//! bazel-harness - drive a build binary against disposable workspaces in tests

pub mod command;
pub mod config;
pub mod error;
pub mod fs_utils;
pub mod runfiles;
pub mod test_case;
pub mod workspace;

pub use command::{BazelCommand, CommandResult};
pub use crate::config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use runfiles::{ArtifactResolver, Runfiles};
pub use test_case::{BazelTestCase, init_test_logging};
pub use workspace::WorkspaceDriver;
