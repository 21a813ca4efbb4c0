//! Glob-based exclusion of destination paths
//!
//! Patterns are matched against the full, joined destination path with `fnmatch`-like rules:
//!
//! - `*` matches anything, including `/`
//! - `?` matches a single character
//! - `[...]` character classes, `[!...]` negated classes
//! - backslash is an ordinary character, not an escape
//! - `{` and `}` are ordinary characters, there is no alternation
//!
//! # Examples
//!
//! ```
//! use common::exclude::ExcludePatterns;
//!
//! let patterns = ExcludePatterns::new(["/sdcard/DCIM/*.tmp"]).unwrap();
//! assert!(patterns.is_excluded("/sdcard/DCIM/a.tmp"));
//! assert!(patterns.is_excluded("/sdcard/DCIM/nested/b.tmp"));
//! assert!(!patterns.is_excluded("/sdcard/DCIM/a.jpg"));
//! ```

use anyhow::{Context, anyhow};
use std::path::Path;

use crate::path::PathSyntax;

/// Wrap every brace outside a character class in a class of its own, so globset matches it
/// literally instead of expanding alternatives.
fn escape_braces(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '[' if !in_class => {
                in_class = true;
                escaped.push(c);
                if let Some(negation) = chars.next_if_eq(&'!') {
                    escaped.push(negation);
                }
                // a leading ] is part of the class
                if let Some(bracket) = chars.next_if_eq(&']') {
                    escaped.push(bracket);
                }
            }
            ']' if in_class => {
                in_class = false;
                escaped.push(c);
            }
            '{' | '}' if !in_class => {
                escaped.push('[');
                escaped.push(c);
                escaped.push(']');
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// A compiled exclude pattern with its original form
#[derive(Debug, Clone)]
pub struct ExcludePattern {
    /// original pattern string, used in log output
    pub original: String,
    matcher: globset::GlobMatcher,
}

impl ExcludePattern {
    pub fn parse(pattern: &str) -> Result<Self, anyhow::Error> {
        if pattern.is_empty() {
            return Err(anyhow!("empty pattern is not allowed"));
        }
        let glob = globset::GlobBuilder::new(&escape_braces(pattern))
            .literal_separator(false) // * matches / like fnmatch
            .backslash_escape(false)
            .case_insensitive(false)
            .build()
            .with_context(|| format!("invalid glob pattern: {pattern}"))?;
        Ok(Self {
            original: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

/// The set of exclude patterns a sync runs with
#[derive(Debug, Clone, Default)]
pub struct ExcludePatterns {
    patterns: Vec<ExcludePattern>,
}

impl ExcludePatterns {
    pub fn new<I, S>(patterns: I) -> Result<Self, anyhow::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| ExcludePattern::parse(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Anchor user supplied patterns to the destination root.
    ///
    /// When the source is a directory each pattern names a path below the destination
    /// directory. Otherwise the pattern is appended verbatim to the destination path.
    pub fn anchored<S: AsRef<str>>(
        patterns: &[S],
        destination_root: &str,
        source_is_dir: bool,
        syntax: &dyn PathSyntax,
    ) -> Result<Self, anyhow::Error> {
        let anchored: Vec<String> = patterns
            .iter()
            .map(|pattern| {
                let joined = if source_is_dir {
                    syntax.join_paths(destination_root, pattern.as_ref())
                } else {
                    format!("{destination_root}{}", pattern.as_ref())
                };
                syntax.normalize_path(&joined)
            })
            .collect();
        Self::new(anchored)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|pattern| pattern.original.as_str())
    }

    /// The first pattern matching `path`, if any.
    pub fn matching(&self, path: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| pattern.matches(path))
            .map(|pattern| pattern.original.as_str())
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.matching(path).is_some()
    }
}

/// Read patterns from an exclude file
///
/// # File Format
/// ```text
/// # comments supported
/// *.tmp
/// Android/data
/// ```
pub fn read_patterns_file(path: &Path) -> Result<Vec<String>, anyhow::Error> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read exclude file: {path:?}"))?;
    Ok(parse_patterns(&content))
}

/// One pattern per line, blank lines and `#` comments skipped
pub fn parse_patterns(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
