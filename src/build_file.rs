//! BUILD file reading for the stub binary
//!
//! Only what the stub needs: rule calls with their kind, `name`, `srcs` and
//! `tags`, plus the labels pulled in with `load(...)`. Anything else in the
//! file is skipped.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Start of a call at the beginning of a line, e.g. `sh_test(`.
static RULE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*([A-Za-z_][A-Za-z0-9_]*)[ \t]*\(")
        .expect("RULE_START regex is invalid")
});

static NAME_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bname\s*=\s*["']([^"']*)["']"#).expect("NAME_ATTR regex is invalid")
});

static SRCS_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bsrcs\s*=\s*\[([^\]]*)\]").expect("SRCS_ATTR regex is invalid")
});

static TAGS_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\btags\s*=\s*\[([^\]]*)\]").expect("TAGS_ATTR regex is invalid")
});

static STRING_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']([^"']*)["']"#).expect("STRING_LITERAL regex is invalid")
});

/// First argument of a `load(...)` call.
static LOAD_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*load\(\s*["']([^"']+)["']"#).expect("LOAD_LABEL regex is invalid")
});

/// Names accepted for package build files, in lookup order.
pub const BUILD_FILE_NAMES: &[&str] = &["BUILD.bazel", "BUILD"];

/// One rule call found in a BUILD file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub kind: String,
    pub name: String,
    pub srcs: Vec<String>,
    pub tags: Vec<String>,
}

impl Rule {
    pub fn is_test(&self) -> bool {
        self.kind.ends_with("_test")
    }

    /// Tagged `manual`: skipped by wildcard patterns, still runnable by label.
    pub fn is_manual(&self) -> bool {
        self.tags.iter().any(|tag| tag == "manual")
    }
}

/// All rule calls that carry a `name` attribute.
pub fn parse_rules(content: &str) -> Vec<Rule> {
    RULE_START
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let kind = caps.get(1)?.as_str();
            let body = call_body(&content[whole.end()..]);
            let name = NAME_ATTR.captures(body)?.get(1)?.as_str().to_string();
            Some(Rule {
                kind: kind.to_string(),
                name,
                srcs: list_attr(&SRCS_ATTR, body),
                tags: list_attr(&TAGS_ATTR, body),
            })
        })
        .collect()
}

/// Labels of every `load(...)` statement.
pub fn loaded_labels(content: &str) -> Vec<String> {
    LOAD_LABEL
        .captures_iter(content)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Text up to the parenthesis closing the call that starts `rest`.
///
/// Parentheses inside string literals do not count.
fn call_body(rest: &str) -> &str {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    for (idx, ch) in rest.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 {
                    return &rest[..idx];
                }
            }
            _ => {}
        }
    }
    rest
}

fn list_attr(pattern: &Regex, body: &str) -> Vec<String> {
    pattern
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|list| {
            STRING_LITERAL
                .captures_iter(list.as_str())
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// The build file of the package at `dir`, if it has one.
pub fn find_build_file(dir: &Path) -> Option<PathBuf> {
    BUILD_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}
