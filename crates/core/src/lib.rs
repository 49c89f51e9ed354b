//! kube-mcp core types: resource objects, coordinates, patch kinds and the error taxonomy.
//!
//! Nothing in this crate talks to a cluster. Discovery lives in `kmcp-kubehub`,
//! network calls in `kmcp_ops`.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub mod columns;
pub mod convert;
pub mod error;
pub mod fieldpath;

pub use error::{Error, Op, Result};

pub mod prelude {
    pub use super::{
        Error, GroupVersionKind, Op, PatchKind, ResourceCoordinates, ResourceObject, Result, Scope,
    };
}

/// Whether a resource type lives inside a namespace or at cluster level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Scope {
    Namespaced,
    Cluster,
}

impl Scope {
    pub fn is_namespaced(self) -> bool {
        matches!(self, Scope::Namespaced)
    }
}

/// Concrete REST coordinates (GVR) of a resolved resource type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceCoordinates {
    /// API group, empty for the legacy core group.
    pub group: String,
    pub version: String,
    /// Plural, lower-case resource name (e.g. `deployments`).
    pub resource: String,
    pub kind: String,
    pub scope: Scope,
}

impl ResourceCoordinates {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn is_namespaced(&self) -> bool {
        self.scope.is_namespaced()
    }

    /// Human-readable target used in error context: `pods/web in namespace default`.
    pub fn describe(&self, namespace: Option<&str>, name: Option<&str>) -> String {
        let mut out = match name {
            Some(n) => format!("{}/{}", self.resource, n),
            None => self.resource.clone(),
        };
        if let Some(ns) = namespace {
            out.push_str(" in namespace ");
            out.push_str(ns);
        }
        out
    }
}

impl fmt::Display for ResourceCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    /// Build from an `apiVersion` string (`v1` or `apps/v1`) and a kind.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        Self { group, version, kind: kind.to_string() }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// One schema-less Kubernetes object.
///
/// The envelope (`apiVersion`, `kind`, `metadata.name`, `metadata.namespace`) has typed
/// accessors; `spec`, `status`, `data` and everything else pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceObject(Json);

impl ResourceObject {
    pub fn api_version(&self) -> Option<&str> {
        self.0.get("apiVersion").and_then(|v| v.as_str())
    }

    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(|v| v.as_str())
    }

    pub fn name(&self) -> Option<&str> {
        self.0.pointer("/metadata/name").and_then(|v| v.as_str())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0
            .pointer("/metadata/namespace")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn gvk(&self) -> Option<GroupVersionKind> {
        Some(GroupVersionKind::from_api_version(self.api_version()?, self.kind()?))
    }

    /// Set or clear `metadata.namespace`, creating `metadata` when needed.
    pub fn set_namespace(&mut self, namespace: Option<&str>) {
        let Some(obj) = self.0.as_object_mut() else { return };
        let meta = obj
            .entry("metadata")
            .or_insert_with(|| Json::Object(serde_json::Map::new()));
        if let Some(meta) = meta.as_object_mut() {
            match namespace {
                Some(ns) => {
                    meta.insert("namespace".into(), Json::String(ns.to_string()));
                }
                None => {
                    meta.remove("namespace");
                }
            }
        }
    }

    /// Fill `apiVersion`/`kind` when absent (list items often come without them).
    pub fn ensure_type_meta(&mut self, api_version: &str, kind: &str) {
        if let Some(obj) = self.0.as_object_mut() {
            obj.entry("apiVersion").or_insert_with(|| Json::String(api_version.to_string()));
            obj.entry("kind").or_insert_with(|| Json::String(kind.to_string()));
        }
    }

    pub fn strip_managed_fields(&mut self) {
        if let Some(meta) = self.0.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.remove("managedFields");
        }
    }

    pub fn as_value(&self) -> &Json {
        &self.0
    }

    pub fn into_value(self) -> Json {
        self.0
    }
}

impl TryFrom<Json> for ResourceObject {
    type Error = Error;

    fn try_from(value: Json) -> Result<Self> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(Error::Validation(format!(
                "expected a mapping for a resource object, got {}",
                json_type_name(&value)
            )))
        }
    }
}

pub(crate) fn json_type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "sequence",
        Json::Object(_) => "mapping",
    }
}

/// Patch strategy, selected by the literal a caller passes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PatchKind {
    /// Field-aware merge; list handling follows the schema's merge keys (server side).
    #[default]
    Strategic,
    /// RFC 7386 JSON merge patch.
    Merge,
    /// RFC 6902 JSON patch (ordered operations, atomic).
    Json,
}

impl PatchKind {
    /// Parse the literal accepted on the tool surface. Empty selects the default.
    pub fn parse(literal: &str) -> Result<Self> {
        match literal {
            "" | "strategic" => Ok(PatchKind::Strategic),
            "merge" => Ok(PatchKind::Merge),
            "json" => Ok(PatchKind::Json),
            other => Err(Error::Validation(format!(
                "invalid patch type {:?} (expected strategic, merge or json)",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatchKind::Strategic => "strategic",
            PatchKind::Merge => "merge",
            PatchKind::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            PatchKind::Strategic => "application/strategic-merge-patch+json",
            PatchKind::Merge => "application/merge-patch+json",
            PatchKind::Json => "application/json-patch+json",
        }
    }
}

impl FromStr for PatchKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
