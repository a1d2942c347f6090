//! Exclude pattern matching.
//!
//! Patterns are `glob` patterns where `*` never crosses a `/` and `**` spans
//! directories. How a pattern is applied depends on its shape:
//!
//! - no `/` (`*.tmp`, `node_modules`): the final path component
//! - leading `/` (`/app/src/gen/**`): the absolute path
//! - anything else (`build/*.o`): the path relative to the watched root it
//!   falls under
//!
//! System paths are always excluded on top of the configured patterns.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use crate::paths::is_system_path;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    FileName,
    Absolute,
    RootRelative,
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    scope: Scope,
}

/// A compiled exclude list bound to the agent's watched roots.
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    roots: Vec<PathBuf>,
    rules: Vec<Rule>,
}

impl ExcludeMatcher {
    /// Compile `patterns`. Invalid patterns are logged and skipped.
    pub fn new(roots: &[PathBuf], patterns: &[String]) -> Self {
        let rules = patterns
            .iter()
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(Rule {
                    pattern,
                    scope: scope_of(raw),
                }),
                Err(err) => {
                    tracing::warn!(pattern = raw, error = %err, "ignoring invalid exclude pattern");
                    None
                }
            })
            .collect();
        Self {
            roots: roots.to_vec(),
            rules,
        }
    }

    /// System path or configured pattern.
    pub fn is_excluded(&self, path: &Path) -> bool {
        is_system_path(path) || self.matches(path)
    }

    /// Configured patterns only.
    pub fn matches(&self, path: &Path) -> bool {
        self.rules.iter().any(|rule| self.rule_matches(rule, path))
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn rule_matches(&self, rule: &Rule, path: &Path) -> bool {
        match rule.scope {
            Scope::FileName => path
                .file_name()
                .map(|name| rule.pattern.matches_with(&name.to_string_lossy(), MATCH_OPTIONS))
                .unwrap_or(false),
            Scope::Absolute => rule.pattern.matches_path_with(path, MATCH_OPTIONS),
            Scope::RootRelative => self
                .roots
                .iter()
                .filter_map(|root| path.strip_prefix(root).ok())
                .any(|relative| rule.pattern.matches_path_with(relative, MATCH_OPTIONS)),
        }
    }
}

fn scope_of(raw: &str) -> Scope {
    if raw.starts_with('/') {
        Scope::Absolute
    } else if raw.contains('/') {
        Scope::RootRelative
    } else {
        Scope::FileName
    }
}
