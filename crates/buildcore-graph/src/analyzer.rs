//! `DependencyAnalyzer`: import scanning → implicit graph edges.
//! Grounded on `turborepo-graph-utils`'s import-scanning shape
//! (its graph-construction helpers) but the scan itself
//! is necessarily language-agnostic here, since language-specific import
//! syntax is a handler concern the core only consumes through this
//! narrow interface.

use std::collections::HashMap;

use buildcore_types::TargetId;
use camino::Utf8Path;
use regex::Regex;

/// Maps a raw import string (as it appears in source, e.g. `"acme/widgets"`
/// or `crate::widgets`) to the `TargetId` that provides it. Built by an
/// external collaborator (the workspace loader) from declared target
/// metadata; the core only consumes it.
#[derive(Debug, Default, Clone)]
pub struct ImportIndex {
    entries: HashMap<String, TargetId>,
}

impl ImportIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, import_path: impl Into<String>, provider: TargetId) {
        self.entries.insert(import_path.into(), provider);
    }

    pub fn resolve(&self, import_path: &str) -> Option<&TargetId> {
        self.entries.get(import_path)
    }
}

/// Scans one source file's contents and returns the raw import strings it
/// references. Implementations are language-specific; the core only needs
/// the strings, resolved to `TargetId`s via `ImportIndex`.
pub trait DependencyAnalyzer: Send + Sync {
    fn scan_imports(&self, path: &Utf8Path, contents: &str) -> Vec<String>;
}

/// Default analyzer: a single configurable regex with one capture group for
/// the import path, applied line-by-line. Covers the common case (`import
/// x`, `use x`, `require(x)`) without hardcoding a specific language's
/// grammar; language handlers needing precise parsing should supply their
/// own `DependencyAnalyzer`.
pub struct RegexImportAnalyzer {
    pattern: Regex,
}

impl RegexImportAnalyzer {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// A reasonable default covering `import`, `use`, and `require`-style
    /// statements across C-like, Rust-like, and JS-like sources.
    pub fn default_pattern() -> Self {
        Self::new(r#"(?:^|\s)(?:import|use|require)\s*[\("]?\s*([\w./:-]+)"#)
            .expect("default pattern is valid")
    }
}

impl DependencyAnalyzer for RegexImportAnalyzer {
    fn scan_imports(&self, _path: &Utf8Path, contents: &str) -> Vec<String> {
        contents
            .lines()
            .filter_map(|line| self.pattern.captures(line))
            .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }
}
