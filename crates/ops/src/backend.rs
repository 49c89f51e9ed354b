//! The seam between the engine and whatever actually stores resources.

use std::fmt;

use kmcp_core::{Error, Op, ResourceCoordinates, ResourceObject, Result};
use kube::api::Patch;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Options for `pod_logs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    pub container: Option<String>,
    /// Logs of the previous, terminated container instance.
    pub previous: bool,
    /// Tail last n lines (server-side)
    pub tail_lines: Option<i64>,
}

/// A "can I do X" question for the current identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessReview {
    pub verb: String,
    pub resource: String,
    pub subresource: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.allowed, self.reason.as_deref().filter(|r| !r.is_empty())) {
            (true, _) => f.write_str("yes"),
            (false, Some(reason)) => write!(f, "no (reason: {})", reason),
            (false, None) => f.write_str("no"),
        }
    }
}

/// Storage-facing operations on already-resolved coordinates.
///
/// `namespace` is already routed: `None` means cluster scope (or all namespaces for a
/// namespaced list). Implementations report failures with the core error taxonomy.
#[async_trait::async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Namespace used when a namespaced manifest does not name one.
    fn default_namespace(&self) -> &str;

    async fn get(&self, coords: &ResourceCoordinates, namespace: Option<&str>, name: &str) -> Result<ResourceObject>;

    async fn list(
        &self,
        coords: &ResourceCoordinates,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<ResourceObject>>;

    /// Server-side apply under `field_manager`.
    async fn apply(
        &self,
        coords: &ResourceCoordinates,
        namespace: Option<&str>,
        name: &str,
        object: &ResourceObject,
        field_manager: &str,
        force: bool,
    ) -> Result<ResourceObject>;

    async fn delete(&self, coords: &ResourceCoordinates, namespace: Option<&str>, name: &str) -> Result<()>;

    async fn patch(
        &self,
        coords: &ResourceCoordinates,
        namespace: Option<&str>,
        name: &str,
        patch: &Patch<Json>,
    ) -> Result<ResourceObject>;

    async fn access_review(&self, review: &AccessReview) -> Result<AccessDecision>;

    async fn pod_logs(&self, namespace: &str, name: &str, opts: &LogOptions) -> Result<String>;
}

/// Map an HTTP status answered by the API server onto the error taxonomy.
pub fn status_error(op: Op, target: String, code: u16, message: String) -> Error {
    match code {
        404 => Error::NotFound { op, target, message },
        409 => Error::Conflict { op, target, message },
        code => Error::Api { op, target, code, message },
    }
}
