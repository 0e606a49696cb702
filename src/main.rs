//! stub-bazel: a small stand-in for the bazel binary
//!
//! Honours just enough of the command-line contract for the harness to be
//! tested without a real Bazel install: `info`, `run` and `test`, exit codes
//! 0/1/2/3/4, INFO and ERROR chatter on stderr and program output on stdout.

mod build_file;

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{self, Command};

use clap::{Parser, Subcommand};
use ignore::WalkBuilder;

use build_file::{Rule, find_build_file, loaded_labels, parse_rules};

const EXIT_BUILD_FAILED: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_TESTS_FAILED: i32 = 3;
const EXIT_NO_TESTS: i32 = 4;

/// Files marking the workspace root, in lookup order.
const WORKSPACE_MARKERS: &[&str] = &["MODULE.bazel", "WORKSPACE.bazel", "WORKSPACE"];

/// Overrides the version reported by `info release`.
const RELEASE_ENV: &str = "STUB_BAZEL_RELEASE";

#[derive(Parser, Debug)]
#[command(name = "stub-bazel")]
#[command(about = "Minimal stand-in for the bazel binary, used by harness tests")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print workspace information (all keys, or only the ones given)
    Info {
        #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Run a single target; arguments after `--` go to the program
    Run {
        #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Run every test matched by the target patterns
    Test {
        #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
        args: Vec<String>,
    },
}

/// Command-line words split into flags, positionals and program arguments.
#[derive(Debug, Default, PartialEq, Eq)]
struct Invocation {
    flags: Vec<String>,
    positional: Vec<String>,
    passthrough: Vec<String>,
}

/// Flags start with `-` and take their value inline (`--x=y`). Everything
/// after a bare `--` is passed through untouched.
fn split_args(args: &[String]) -> Invocation {
    let mut invocation = Invocation::default();
    let mut iter = args.iter();
    for arg in iter.by_ref() {
        if arg == "--" {
            break;
        }
        if arg.starts_with('-') {
            invocation.flags.push(arg.clone());
        } else {
            invocation.positional.push(arg.clone());
        }
    }
    invocation.passthrough = iter.cloned().collect();
    if !invocation.flags.is_empty() {
        tracing::debug!(flags = ?invocation.flags, "ignoring flags");
    }
    invocation
}

/// Where the command runs: workspace root and the package of the cwd.
#[derive(Debug)]
struct Context {
    root: PathBuf,
    package: PathBuf,
    cwd: PathBuf,
}

impl Context {
    fn discover(cwd: PathBuf) -> Self {
        let root = cwd
            .ancestors()
            .find(|dir| WORKSPACE_MARKERS.iter().any(|m| dir.join(m).is_file()))
            .unwrap_or(cwd.as_path())
            .to_path_buf();
        let package = cwd
            .strip_prefix(&root)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self { root, package, cwd }
    }
}

/// A parsed target pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Target { package: PathBuf, name: String },
    Recursive { package: PathBuf },
}

/// Parse `raw` as seen from the package `current`.
fn parse_pattern(current: &Path, raw: &str) -> Pattern {
    let (base, rest) = match raw.strip_prefix("//") {
        Some(rest) => (PathBuf::new(), rest),
        None => (current.to_path_buf(), raw),
    };

    if rest == "..." || rest.ends_with("/...") {
        let prefix = rest.trim_end_matches("...").trim_end_matches('/');
        return Pattern::Recursive {
            package: base.join(prefix),
        };
    }

    match rest.split_once(':') {
        Some((package, name)) => Pattern::Target {
            package: base.join(package),
            name: name.to_string(),
        },
        // `//foo/bar` names `//foo/bar:bar`; a bare word is a target in the
        // current package
        None if raw.starts_with("//") => {
            let package = base.join(rest);
            let name = package
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Pattern::Target { package, name }
        }
        None => Pattern::Target {
            package: base,
            name: rest.to_string(),
        },
    }
}

fn label(package: &Path, name: &str) -> String {
    format!("//{}:{}", package.to_string_lossy(), name)
}

/// Failure that ends the command with the given exit code.
#[derive(Debug)]
struct Failure {
    code: i32,
    message: String,
}

impl Failure {
    fn build(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_BUILD_FAILED,
            message: message.into(),
        }
    }

    fn usage(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_USAGE,
            message: message.into(),
        }
    }
}

/// Read the rules of one package, checking that its loads resolve.
fn load_package(ctx: &Context, package: &Path) -> Result<Vec<Rule>, Failure> {
    let dir = ctx.root.join(package);
    let build = find_build_file(&dir).ok_or_else(|| {
        Failure::build(format!(
            "no such package '{}': BUILD file not found",
            package.to_string_lossy()
        ))
    })?;
    let content = fs::read_to_string(&build)
        .map_err(|e| Failure::build(format!("cannot read '{}': {}", build.display(), e)))?;

    for loaded in loaded_labels(&content) {
        let (load_package, file) = match parse_pattern(package, &loaded) {
            Pattern::Target { package, name } => (package, name),
            Pattern::Recursive { .. } => {
                return Err(Failure::build(format!("invalid load label '{}'", loaded)));
            }
        };
        let load_dir = ctx.root.join(&load_package);
        if find_build_file(&load_dir).is_none() || !load_dir.join(&file).is_file() {
            return Err(Failure::build(format!(
                "error loading package '{}': cannot load '{}': no such file",
                package.to_string_lossy(),
                loaded
            )));
        }
    }

    Ok(parse_rules(&content))
}

/// Packages at or below `package`, in path order.
fn packages_below(ctx: &Context, package: &Path) -> Vec<PathBuf> {
    let start = ctx.root.join(package);
    let walker = WalkBuilder::new(&start)
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with("bazel-")
        })
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    walker
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_dir()))
        .filter(|entry| find_build_file(entry.path()).is_some())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(&ctx.root)
                .ok()
                .map(Path::to_path_buf)
        })
        .collect()
}

fn find_rule(ctx: &Context, package: &Path, name: &str) -> Result<Rule, Failure> {
    load_package(ctx, package)?
        .into_iter()
        .find(|rule| rule.name == name)
        .ok_or_else(|| {
            Failure::build(format!(
                "no such target '{}': target '{}' not declared in package '{}'",
                label(package, name),
                name,
                package.to_string_lossy()
            ))
        })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// The command that runs `src` of a rule, or `None` if the stub cannot run it.
fn program_for(ctx: &Context, package: &Path, rule: &Rule) -> Result<Option<Command>, Failure> {
    let Some(src) = rule.srcs.first() else {
        return Ok(None);
    };
    let path = ctx.root.join(package).join(src);
    if !path.is_file() {
        return Err(Failure::build(format!(
            "missing input file '{}'",
            label(package, src)
        )));
    }
    if !src.ends_with(".sh") {
        return Ok(None);
    }
    if !is_executable(&path) {
        return Err(Failure::build(format!(
            "{} is not executable",
            label(package, src)
        )));
    }

    let mut command = Command::new("/bin/sh");
    command
        .arg(&path)
        .current_dir(&ctx.root)
        .env("BUILD_WORKSPACE_DIRECTORY", &ctx.root)
        .env("BUILD_WORKING_DIRECTORY", &ctx.cwd);
    Ok(Some(command))
}

fn release() -> String {
    env::var(RELEASE_ENV).unwrap_or_else(|_| format!("stub-{}", env!("CARGO_PKG_VERSION")))
}

fn info(ctx: &Context, invocation: &Invocation) -> Result<i32, Failure> {
    let entries = [
        ("release", format!("release {}", release())),
        ("workspace", ctx.root.display().to_string()),
    ];

    match invocation.positional.as_slice() {
        [key] => {
            let (_, value) = entries
                .iter()
                .find(|(name, _)| name == key)
                .ok_or_else(|| Failure::usage(format!("unknown key: '{}'", key)))?;
            println!("{}", value);
        }
        keys => {
            for (name, value) in &entries {
                if keys.is_empty() || keys.iter().any(|k| k == name) {
                    println!("{}: {}", name, value);
                }
            }
        }
    }
    Ok(0)
}

fn run(ctx: &Context, invocation: &Invocation) -> Result<i32, Failure> {
    let raw = invocation
        .positional
        .first()
        .ok_or_else(|| Failure::usage("Must specify a target to run"))?;
    let (package, name) = match parse_pattern(&ctx.package, raw) {
        Pattern::Target { package, name } => (package, name),
        Pattern::Recursive { .. } => {
            return Err(Failure::usage("Only a single target can be run"));
        }
    };
    let rule = find_rule(ctx, &package, &name)?;
    let mut command = program_for(ctx, &package, &rule)?.ok_or_else(|| {
        Failure::build(format!(
            "Cannot run target {}: Not executable",
            label(&package, &name)
        ))
    })?;
    command.args(&invocation.passthrough);

    eprintln!("INFO: Running command line: {}", label(&package, &name));
    let status = command
        .status()
        .map_err(|e| Failure::build(format!("failed to start {}: {}", label(&package, &name), e)))?;
    Ok(status.code().unwrap_or(EXIT_BUILD_FAILED))
}

fn test(ctx: &Context, invocation: &Invocation) -> Result<i32, Failure> {
    if invocation.positional.is_empty() {
        return Err(Failure::usage("Must specify at least one target"));
    }

    let mut selected: Vec<(PathBuf, Rule)> = Vec::new();
    let mut seen = BTreeSet::new();
    for raw in &invocation.positional {
        match parse_pattern(&ctx.package, raw) {
            Pattern::Target { package, name } => {
                let rule = find_rule(ctx, &package, &name)?;
                if rule.is_test() && seen.insert(label(&package, &name)) {
                    selected.push((package, rule));
                }
            }
            Pattern::Recursive { package } => {
                for found in packages_below(ctx, &package) {
                    for rule in load_package(ctx, &found)? {
                        if rule.is_test()
                            && !rule.is_manual()
                            && seen.insert(label(&found, &rule.name))
                        {
                            selected.push((found.clone(), rule));
                        }
                    }
                }
            }
        }
    }

    if selected.is_empty() {
        eprintln!("ERROR: No test targets were found, yet testing was requested");
        return Ok(EXIT_NO_TESTS);
    }

    let mut failed = 0usize;
    for (package, rule) in &selected {
        let target = label(package, &rule.name);
        let passed = match program_for(ctx, package, rule)? {
            Some(mut command) => {
                let output = command.output().map_err(|e| {
                    Failure::build(format!("failed to start {}: {}", target, e))
                })?;
                if !output.status.success() {
                    for line in String::from_utf8_lossy(&output.stdout).lines() {
                        println!("{}", line);
                    }
                }
                output.status.success()
            }
            None => true,
        };
        if passed {
            println!("{} PASSED", target);
        } else {
            println!("{} FAILED", target);
            failed += 1;
        }
    }

    let total = selected.len();
    println!(
        "Executed {} out of {} tests: {} tests pass and {} fail",
        total,
        total,
        total - failed,
        failed
    );
    Ok(if failed == 0 { 0 } else { EXIT_TESTS_FAILED })
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    let args = Args::parse();
    let cwd = env::current_dir().unwrap_or_else(|e| {
        eprintln!("ERROR: cannot determine working directory: {}", e);
        process::exit(EXIT_BUILD_FAILED);
    });
    let ctx = Context::discover(cwd);

    tracing::debug!(root = %ctx.root.display(), package = %ctx.package.display(), "workspace");

    let outcome = match &args.command {
        Commands::Info { args } => info(&ctx, &split_args(args)),
        Commands::Run { args } => run(&ctx, &split_args(args)),
        Commands::Test { args } => test(&ctx, &split_args(args)),
    };
    match outcome {
        Ok(code) => process::exit(code),
        Err(failure) => {
            eprintln!("ERROR: {}", failure.message);
            process::exit(failure.code);
        }
    }
}
