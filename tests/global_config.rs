//! Process-wide configuration loaded from the environment
//!
//! Lives in its own test binary so the global is first loaded here, after
//! the environment below is in place. Keep this file to a single test: the
//! environment is process state.

use std::fs;
use std::sync::Arc;

use bazel_harness::{BazelTestCase, HarnessConfig};
use tempfile::TempDir;

#[test]
fn test_global_config_layers_file_and_environment_once() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("harness.toml");
    fs::write(
        &file,
        "[bazel]\nversion = \"6.0.0\"\n\n[foo]\nfrom_file = \"yes\"\nbar = \"false\"\n",
    )
    .unwrap();

    // SAFETY: the only test in this binary, and no other thread reads the
    // environment before the global is loaded.
    unsafe {
        std::env::set_var("BAZEL_HARNESS_CONFIG", &file);
        std::env::set_var("BAZEL_HARNESS_FOO__BAR", "true");
        std::env::set_var("BAZEL_HARNESS_BAZEL__VERSION", "7.2.0");
        std::env::set_var("BAZEL_HARNESS_HARNESS__TMP_ROOT", dir.path());
    }

    let first = HarnessConfig::global().unwrap();
    let second = HarnessConfig::global().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // environment wins over the file, the file over the defaults
    assert_eq!(first.property("foo.bar").as_deref(), Some("true"));
    assert_eq!(first.bazel_version(), Some("7.2.0"));
    assert_eq!(first.property("foo.from_file").as_deref(), Some("yes"));
    assert_eq!(first.property("bazel.path").as_deref(), Some("bazel"));
    assert_eq!(first.tmp_root(), dir.path());

    // later changes are not seen once the global is resolved
    unsafe {
        std::env::set_var("BAZEL_HARNESS_FOO__BAR", "changed");
    }
    assert_eq!(
        HarnessConfig::global().unwrap().property("foo.bar").as_deref(),
        Some("true")
    );

    let case = BazelTestCase::new().unwrap();
    assert!(case.driver().root().starts_with(dir.path()));
    assert_eq!(case.config().bazel_version(), Some("7.2.0"));
}
