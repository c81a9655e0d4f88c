//! Error taxonomy shared across the core.
//!
//! Every fallible operation in `buildcore` returns a `Result` carrying a
//! [`CoreError`]; there is no unwinding-based failure signaling.
//! Mirrors `turborepo-errors::ErrorClassification`'s
//! shape (exit code + retryability + fatality per kind) but keyed to this
//! crate's own error kinds.

use std::fmt;

use thiserror::Error;

use crate::target::TargetId;

/// Broad category of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Input,
    Graph,
    Io,
    Cache,
    Network,
    Handler,
    System,
    Cancelled,
}

impl ErrorKind {
    /// Whether an error of this kind is ever worth a retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Handler | ErrorKind::System)
    }

    /// Whether this kind is fatal to the whole build invocation (as opposed
    /// to a single node, or a degrade-silently tier).
    pub fn is_build_fatal(self) -> bool {
        matches!(self, ErrorKind::Input | ErrorKind::Graph)
    }

    /// Whether this kind should ever surface to the user outside verbose mode.
    pub fn is_user_visible_by_default(self) -> bool {
        !matches!(self, ErrorKind::Cache | ErrorKind::Network)
    }

    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Input => 2,
            ErrorKind::Graph => 2,
            ErrorKind::Io => 1,
            ErrorKind::Cache => 0,
            ErrorKind::Network => 0,
            ErrorKind::Handler => 1,
            ErrorKind::System => 1,
            ErrorKind::Cancelled => 130,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Input => "input",
            ErrorKind::Graph => "graph",
            ErrorKind::Io => "io",
            ErrorKind::Cache => "cache",
            ErrorKind::Network => "network",
            ErrorKind::Handler => "handler",
            ErrorKind::System => "system",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A `buildcore`-wide error: kind, message, optional cause chain, and the
/// originating target where applicable.
#[derive(Debug, Error)]
#[error("{kind}: {message}{}", target.as_ref().map(|t| format!(" (target {t})")).unwrap_or_default())]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub target: Option<TargetId>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

/// `ErrorKind` varies per instance rather than per type, so the diagnostic
/// code/severity are derived from it by hand instead of via
/// `#[derive(miette::Diagnostic)]`'s static `#[diagnostic(code(...))]`.
impl miette::Diagnostic for CoreError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(format!("buildcore::{}", self.kind)))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(match self.kind.exit_code() {
            0 => miette::Severity::Advice,
            130 => miette::Severity::Warning,
            _ => miette::Severity::Error,
        })
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.kind
            .is_retryable()
            .then(|| Box::new("this error kind is retryable; the scheduler may already be retrying it") as Box<dyn fmt::Display>)
    }
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            target: None,
            cause: None,
        }
    }

    pub fn with_target(mut self, target: TargetId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Input, message)
    }

    pub fn graph(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Graph, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::System, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "build cancelled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_is_retryable_and_not_fatal() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(!ErrorKind::Network.is_build_fatal());
        assert_eq!(ErrorKind::Network.exit_code(), 0);
    }

    #[test]
    fn graph_is_fatal_not_retryable() {
        assert!(!ErrorKind::Graph.is_retryable());
        assert!(ErrorKind::Graph.is_build_fatal());
        assert_eq!(ErrorKind::Graph.exit_code(), 2);
    }

    #[test]
    fn cancelled_exit_code_is_130() {
        assert_eq!(CoreError::cancelled().kind.exit_code(), 130);
    }

    #[test]
    fn display_includes_target() {
        let err = CoreError::handler("compile failed").with_target(TargetId::new("w", "p", "x"));
        let s = err.to_string();
        assert!(s.contains("w//p:x"));
    }

    #[test]
    fn diagnostic_code_reflects_kind() {
        use miette::Diagnostic;
        let err = CoreError::cache("miss");
        assert_eq!(err.code().unwrap().to_string(), "buildcore::cache");
        assert_eq!(err.severity(), Some(miette::Severity::Advice));
    }

    #[test]
    fn retryable_kinds_carry_help_text() {
        use miette::Diagnostic;
        assert!(CoreError::network("timed out").help().is_some());
        assert!(CoreError::input("bad config").help().is_none());
    }
}
