//! Error taxonomy shared by every layer that touches a resource.

use std::fmt;

use serde::{Deserialize, Serialize};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Operation an error happened in; carried for caller-side retry decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Op {
    Discover,
    Get,
    List,
    Apply,
    Delete,
    Patch,
    AccessReview,
    Logs,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Discover => "discover",
            Op::Get => "get",
            Op::List => "list",
            Op::Apply => "apply",
            Op::Delete => "delete",
            Op::Patch => "patch",
            Op::AccessReview => "access review",
            Op::Logs => "logs",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("resource kind {identifier:?} not found{}", did_you_mean(.suggestion))]
    ResourceKindNotFound { identifier: String, suggestion: Option<String> },

    #[error("discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    #[error("{op} {target}: not found: {message}")]
    NotFound { op: Op, target: String, message: String },

    #[error("validation: {0}")]
    Validation(String),

    #[error("{op} {target}: conflict: {message}")]
    Conflict { op: Op, target: String, message: String },

    /// Any other status the API server answered with (forbidden, invalid, ...).
    #[error("{op} {target}: rejected by server ({code}): {message}")]
    Api { op: Op, target: String, code: u16, message: String },

    #[error("{op} {target}: transport: {message}")]
    Transport { op: Op, target: String, message: String },

    #[error("{operation}: cancelled after {after_ms}ms")]
    Cancelled { operation: String, after_ms: u64 },

    #[error("encoding output: {0}")]
    Encode(String),

    /// A multi-document apply stopped at `index` (1-based); earlier documents stay applied.
    #[error("apply document {index} of {total} failed: {source}")]
    ApplyDocument { index: usize, total: usize, source: Box<Error> },
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean {:?}?)", s),
        None => String::new(),
    }
}

impl Error {
    /// Prefix a validation message with the operation and what it targeted.
    pub fn in_context(self, op: Op, target: &str) -> Self {
        match self {
            Error::Validation(message) => Error::Validation(format!("{} {}: {}", op, target, message)),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::ApplyDocument { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Short stable label used for metrics and logs.
    pub fn class(&self) -> &'static str {
        match self {
            Error::ResourceKindNotFound { .. } => "resolution",
            Error::DiscoveryUnavailable(_) => "discovery_unavailable",
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation",
            Error::Conflict { .. } => "conflict",
            Error::Api { .. } => "api",
            Error::Transport { .. } => "transport",
            Error::Cancelled { .. } => "cancelled",
            Error::Encode(_) => "encode",
            Error::ApplyDocument { source, .. } => source.class(),
        }
    }
}

impl From<crate::fieldpath::PathError> for Error {
    fn from(e: crate::fieldpath::PathError) -> Self {
        Error::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let e = Error::NotFound { op: Op::Delete, target: "pods/web in namespace default".into(), message: "pods \"web\" not found".into() };
        assert_eq!(e.to_string(), "delete pods/web in namespace default: not found: pods \"web\" not found");

        let e = Error::ResourceKindNotFound { identifier: "deploymnt".into(), suggestion: Some("deployments".into()) };
        assert_eq!(e.to_string(), "resource kind \"deploymnt\" not found (did you mean \"deployments\"?)");

        let e = Error::ResourceKindNotFound { identifier: "zzz".into(), suggestion: None };
        assert_eq!(e.to_string(), "resource kind \"zzz\" not found");
    }

    #[test]
    fn validation_context_names_operation_and_target() {
        let e = Error::Validation("namespace is required".into()).in_context(Op::Delete, "pods/web");
        assert_eq!(e.to_string(), "validation: delete pods/web: namespace is required");
        let e = Error::DiscoveryUnavailable("down".into()).in_context(Op::Get, "pods");
        assert_eq!(e.to_string(), "discovery unavailable: down");
    }

    #[test]
    fn apply_document_wraps_class_and_not_found() {
        let inner = Error::NotFound { op: Op::Apply, target: "x".into(), message: "gone".into() };
        let e = Error::ApplyDocument { index: 2, total: 3, source: Box::new(inner) };
        assert!(e.is_not_found());
        assert_eq!(e.class(), "not_found");
        assert!(e.to_string().starts_with("apply document 2 of 3 failed"));
    }
}
