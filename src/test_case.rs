//! Per-test setup and teardown.
//!
//! ```no_run
//! use bazel_harness::BazelTestCase;
//!
//! # fn main() -> bazel_harness::Result<()> {
//! let case = BazelTestCase::new()?;
//! case.driver().scratch_file("foo/BUILD", ["sh_binary(name = 'bar', srcs = ['bar.sh'])"])?;
//! case.driver().scratch_executable_file("foo/bar.sh", ["echo in bar"])?;
//! let result = case
//!     .driver()
//!     .bazel(["run", "bar"])
//!     .in_working_directory("foo")?
//!     .must_run_successfully()?;
//! assert!(result.output_lines().iter().any(|l| l == "in bar"));
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Once};

use tracing_subscriber::EnvFilter;

use crate::config::HarnessConfig;
use crate::error::Result;
use crate::workspace::WorkspaceDriver;

static LOGGING: Once = Once::new();

/// Install a test-friendly `tracing` subscriber once per process.
///
/// Output goes through the test writer so it is captured per test. The
/// filter comes from `RUST_LOG` and defaults to `warn`. A subscriber that
/// is already installed elsewhere is left alone.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .try_init();
    });
}

/// A fresh workspace for one test, torn down when the value is dropped.
///
/// Dropping happens on every exit path of the test body, panics included,
/// so the workspace never outlives the test.
pub struct BazelTestCase {
    config: Arc<HarnessConfig>,
    driver: WorkspaceDriver,
}

impl BazelTestCase {
    /// Set up with the process-wide configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(HarnessConfig::global()?)
    }

    /// Set up with an explicit configuration handle.
    pub fn with_config(config: Arc<HarnessConfig>) -> Result<Self> {
        init_test_logging();
        let driver = WorkspaceDriver::create(&config)?;
        Ok(Self { config, driver })
    }

    pub fn driver(&self) -> &WorkspaceDriver {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut WorkspaceDriver {
        &mut self.driver
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }
}

impl Drop for BazelTestCase {
    fn drop(&mut self) {
        self.driver.teardown();
    }
}
