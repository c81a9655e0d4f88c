//! `TargetId` parsing/resolution and the immutable `Target` descriptor.

use std::{collections::BTreeMap, fmt};

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetIdError {
    #[error("empty target string")]
    Empty,
    #[error("target string {0:?} is missing a `:name` component")]
    MissingName,
    #[error("relative target {0:?} requires a package context to resolve")]
    NeedsPackageContext(String),
}

/// Fully-qualified identifier `workspace//path:name`.
///
/// Unique per workspace, case-sensitive, order-independent. The stable
/// string form (`Display`) is used as hash input wherever a `TargetId` needs
/// to participate in a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId {
    workspace: String,
    package: String,
    name: String,
}

impl TargetId {
    pub fn new(workspace: impl Into<String>, package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            package: package.into(),
            name: name.into(),
        }
    }

    /// Parse an absolute or package-relative target string.
    ///
    /// - `workspace//path:name` — fully absolute.
    /// - `//path:name` — absolute within `workspace`.
    /// - `:name` — relative, resolved against `current_package`.
    pub fn parse(s: &str, workspace: &str, current_package: Option<&str>) -> Result<Self, TargetIdError> {
        if s.is_empty() {
            return Err(TargetIdError::Empty);
        }

        if let Some(rest) = s.strip_prefix(':') {
            let package = current_package
                .ok_or_else(|| TargetIdError::NeedsPackageContext(s.to_string()))?;
            if rest.is_empty() {
                return Err(TargetIdError::MissingName);
            }
            return Ok(Self::new(workspace, package, rest));
        }

        let (ws, path_and_name) = if let Some(idx) = s.find("//") {
            let (ws_part, rest) = s.split_at(idx);
            let ws = if ws_part.is_empty() { workspace } else { ws_part };
            (ws, &rest[2..])
        } else {
            (workspace, s)
        };

        let (package, name) = path_and_name
            .split_once(':')
            .ok_or_else(|| TargetIdError::MissingName)?;
        if name.is_empty() {
            return Err(TargetIdError::MissingName);
        }

        Ok(Self::new(ws, package, name))
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable string form, also used as fingerprint input.
    pub fn stable_string(&self) -> String {
        format!("{}//{}:{}", self.workspace, self.package, self.name)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stable_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Executable,
    Library,
    Test,
    Custom(String),
}

/// A target's implementation language, matched against `HandlerRegistry`
/// entries. Closed over the common cases the core ships a default import
/// scanner for; anything else falls through to `Other` rather than
/// rejecting the target outright.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Go,
    Python,
    Other(String),
}

impl From<&str> for Language {
    fn from(s: &str) -> Self {
        match s {
            "rust" => Language::Rust,
            "javascript" | "js" => Language::JavaScript,
            "typescript" | "ts" => Language::TypeScript,
            "go" => Language::Go,
            "python" | "py" => Language::Python,
            other => Language::Other(other.to_string()),
        }
    }
}

impl From<String> for Language {
    fn from(s: String) -> Self {
        Language::from(s.as_str())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Rust => write!(f, "rust"),
            Language::JavaScript => write!(f, "javascript"),
            Language::TypeScript => write!(f, "typescript"),
            Language::Go => write!(f, "go"),
            Language::Python => write!(f, "python"),
            Language::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Immutable descriptor of a workspace target.
///
/// Invariant: `sources` are workspace-root-relative paths; no path appears
/// twice within one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: TargetId,
    pub kind: TargetKind,
    pub language: Language,
    pub sources: Vec<Utf8PathBuf>,
    pub dependencies: Vec<TargetId>,
    pub config: BTreeMap<String, String>,
    pub output: Option<Utf8PathBuf>,
}

impl Target {
    pub fn new(id: TargetId, kind: TargetKind, language: impl Into<Language>) -> Self {
        Self {
            id,
            kind,
            language: language.into(),
            sources: Vec::new(),
            dependencies: Vec::new(),
            config: BTreeMap::new(),
            output: None,
        }
    }

    /// Validates the "no source appears twice" invariant.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for src in &self.sources {
            if !seen.insert(src) {
                return Err(format!("duplicate source {src} in target {}", self.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute() {
        let id = TargetId::parse("acme//pkg/a:lib", "default", None).unwrap();
        assert_eq!(id.workspace(), "acme");
        assert_eq!(id.package(), "pkg/a");
        assert_eq!(id.name(), "lib");
    }

    #[test]
    fn parses_workspace_relative_absolute() {
        let id = TargetId::parse("//pkg/a:lib", "acme", None).unwrap();
        assert_eq!(id.workspace(), "acme");
        assert_eq!(id.stable_string(), "acme//pkg/a:lib");
    }

    #[test]
    fn parses_package_relative() {
        let id = TargetId::parse(":lib", "acme", Some("pkg/a")).unwrap();
        assert_eq!(id.stable_string(), "acme//pkg/a:lib");
    }

    #[test]
    fn relative_without_context_errors() {
        let err = TargetId::parse(":lib", "acme", None).unwrap_err();
        assert_eq!(err, TargetIdError::NeedsPackageContext(":lib".to_string()));
    }

    #[test]
    fn missing_name_errors() {
        assert_eq!(
            TargetId::parse("acme//pkg/a", "acme", None).unwrap_err(),
            TargetIdError::MissingName
        );
    }

    #[test]
    fn ordering_is_by_stable_string() {
        let a = TargetId::new("w", "p", "a");
        let b = TargetId::new("w", "p", "b");
        assert!(a < b);
    }

    #[test]
    fn duplicate_sources_rejected() {
        let mut t = Target::new(TargetId::new("w", "p", "x"), TargetKind::Library, "rust");
        t.sources.push("a.rs".into());
        t.sources.push("a.rs".into());
        assert!(t.validate().is_err());
    }

    #[test]
    fn custom_kind_carries_its_name() {
        let t = Target::new(TargetId::new("w", "p", "x"), TargetKind::Custom("codegen".into()), "python");
        assert_eq!(t.kind, TargetKind::Custom("codegen".to_string()));
    }

    #[test]
    fn unrecognized_language_falls_back_to_other() {
        let t = Target::new(TargetId::new("w", "p", "x"), TargetKind::Library, "cobol");
        assert_eq!(t.language, Language::Other("cobol".to_string()));
    }

    #[test]
    fn known_language_names_round_trip_through_display() {
        for (name, lang) in [("rust", Language::Rust), ("go", Language::Go), ("python", Language::Python)] {
            let t = Target::new(TargetId::new("w", "p", "x"), TargetKind::Library, name);
            assert_eq!(t.language, lang);
            assert_eq!(t.language.to_string(), name);
        }
    }
}
