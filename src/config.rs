//! Process-wide harness configuration.
//!
//! [`HarnessConfig::load`] layers three sources, later ones winning:
//!
//! 1. the built-in defaults below,
//! 2. a TOML file named by `BAZEL_HARNESS_CONFIG`, if set,
//! 3. environment variables `BAZEL_HARNESS_<SECTION>__<KEY>`.
//!
//! [`HarnessConfig::global`] resolves that once per process and hands out
//! shared read-only handles. Tests that need specific values build their own
//! with [`HarnessConfig::with_properties`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use config::{Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::{HarnessError, Result};
use crate::fs_utils;
use crate::runfiles::Runfiles;

/// Names a TOML file layered over the defaults.
pub const CONFIG_FILE_ENV: &str = "BAZEL_HARNESS_CONFIG";

/// Prefix for environment overrides, e.g. `BAZEL_HARNESS_BAZEL__VERSION`.
pub const ENV_PREFIX: &str = "BAZEL_HARNESS";

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[bazel]
path = "bazel"
"#;

// ---------------------------------------------------------------------------
// Typed sections
// ---------------------------------------------------------------------------

/// `[bazel]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BazelSettings {
    #[serde(default = "default_bazel_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub version: Option<String>,
}

fn default_bazel_path() -> PathBuf {
    PathBuf::from("bazel")
}

impl Default for BazelSettings {
    fn default() -> Self {
        Self {
            path: default_bazel_path(),
            version: None,
        }
    }
}

/// `[harness]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarnessSettings {
    /// Parent directory for workspaces.
    #[serde(default)]
    pub tmp_root: Option<PathBuf>,
}

/// `[runfiles]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunfilesSettings {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Settings {
    #[serde(default)]
    bazel: BazelSettings,
    #[serde(default)]
    harness: HarnessSettings,
    #[serde(default)]
    runfiles: RunfilesSettings,
}

// ---------------------------------------------------------------------------
// HarnessConfig
// ---------------------------------------------------------------------------

/// Read-only configuration shared by every test in the process.
///
/// Besides the known sections, any other key is kept as an injected
/// property and can be read back with [`HarnessConfig::property`].
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    properties: config::Config,
    settings: Settings,
    runfiles: OnceLock<std::result::Result<Arc<Runfiles>, String>>,
}

static GLOBAL: OnceLock<std::result::Result<Arc<HarnessConfig>, String>> = OnceLock::new();

impl HarnessConfig {
    /// The process-wide configuration, loaded on first use.
    ///
    /// A load failure is remembered too, so every caller sees the same error.
    pub fn global() -> Result<Arc<HarnessConfig>> {
        GLOBAL
            .get_or_init(|| {
                HarnessConfig::load()
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(HarnessError::Environment)
    }

    /// Load defaults, the optional config file and the environment.
    pub fn load() -> Result<Self> {
        let mut builder = defaults();
        if let Some(path) = std::env::var_os(CONFIG_FILE_ENV) {
            builder = builder.add_source(
                File::from(PathBuf::from(path))
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }
        let builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );
        Self::from_config(builder.build()?)
    }

    /// Load defaults plus a single TOML file, ignoring the environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        let built = defaults()
            .add_source(File::from(path).format(FileFormat::Toml).required(true))
            .build()?;
        Self::from_config(built)
    }

    /// Defaults plus explicit `key = value` overrides, ignoring the environment.
    ///
    /// ```no_run
    /// # use bazel_harness::HarnessConfig;
    /// let config = HarnessConfig::with_properties([
    ///     ("bazel.path", "/opt/bazel/bin/bazel"),
    ///     ("bazel.version", "7.1.0"),
    ///     ("foo.bar", "true"),
    /// ])?;
    /// assert_eq!(config.property("foo.bar").as_deref(), Some("true"));
    /// # Ok::<(), bazel_harness::HarnessError>(())
    /// ```
    pub fn with_properties<I, K, V>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<config::Value>,
    {
        let mut builder = defaults();
        for (key, value) in properties {
            builder = builder.set_override(key, value)?;
        }
        Self::from_config(builder.build()?)
    }

    fn from_config(properties: config::Config) -> Result<Self> {
        let mut settings: Settings = properties.clone().try_deserialize()?;
        settings.bazel.path = fs_utils::program_path(settings.bazel.path)?;
        Ok(Self {
            properties,
            settings,
            runfiles: OnceLock::new(),
        })
    }

    /// Any property by dotted key, rendered as a string.
    pub fn property(&self, key: &str) -> Option<String> {
        self.properties.get_string(key).ok()
    }

    /// Path (or bare name looked up on `PATH`) of the build binary.
    ///
    /// A relative path with a directory part was made absolute against the
    /// current directory when the configuration was loaded.
    pub fn bazel_binary(&self) -> &Path {
        &self.settings.bazel.path
    }

    /// Version of the build binary under test, when it was injected.
    pub fn bazel_version(&self) -> Option<&str> {
        self.settings.bazel.version.as_deref()
    }

    /// Directory under which workspaces are allocated.
    ///
    /// Falls back to Bazel's `TEST_TMPDIR`, then to the system temp dir.
    pub fn tmp_root(&self) -> PathBuf {
        self.settings
            .harness
            .tmp_root
            .clone()
            .or_else(|| std::env::var_os("TEST_TMPDIR").map(PathBuf::from))
            .unwrap_or_else(std::env::temp_dir)
    }

    /// The runfiles available to this process.
    ///
    /// Configured values win over Bazel's `RUNFILES_DIR`, `TEST_SRCDIR` and
    /// `RUNFILES_MANIFEST_FILE`; a directory wins over a manifest. Resolved
    /// on first use, so a manifest is read once per configuration.
    pub fn runfiles(&self) -> Result<Arc<Runfiles>> {
        self.runfiles
            .get_or_init(|| {
                self.locate_runfiles()
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(HarnessError::Environment)
    }

    fn locate_runfiles(&self) -> Result<Runfiles> {
        let runfiles = &self.settings.runfiles;
        let dir = runfiles.dir.clone().or_else(|| {
            std::env::var_os("RUNFILES_DIR")
                .or_else(|| std::env::var_os("TEST_SRCDIR"))
                .map(PathBuf::from)
        });
        if let Some(dir) = dir {
            return Ok(Runfiles::Directory(dir));
        }

        let manifest = runfiles
            .manifest
            .clone()
            .or_else(|| std::env::var_os("RUNFILES_MANIFEST_FILE").map(PathBuf::from));
        match manifest {
            Some(manifest) => Runfiles::from_manifest(&manifest),
            None => Ok(Runfiles::Unavailable),
        }
    }
}

fn defaults() -> config::ConfigBuilder<config::builder::DefaultState> {
    config::Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
