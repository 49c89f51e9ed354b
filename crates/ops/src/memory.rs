//! In-memory `ResourceBackend` for tests and offline use.
//!
//! Close enough to an API server for engine-level behavior: objects keyed by group,
//! resource, namespace and name; resourceVersion bumps; merge-style apply; RFC 7386 / 6902
//! patches (strategic merge is treated as a JSON merge patch). Every call is recorded.

use std::collections::{BTreeMap, HashMap};

use kmcp_core::{Error, Op, ResourceCoordinates, ResourceObject, Result};
use kube::api::Patch;
use serde_json::{json, Value as Json};
use tokio::sync::Mutex;

use crate::backend::{status_error, AccessDecision, AccessReview, LogOptions, ResourceBackend};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    group: String,
    resource: String,
    namespace: String,
    name: String,
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub resource: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    /// Field manager, for apply calls.
    pub field_manager: Option<String>,
}

/// A failure to inject for a specific operation and object name.
#[derive(Debug, Clone)]
pub enum Failure {
    /// The server answers with this HTTP status.
    Status(u16, String),
    Transport(String),
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Json>,
    calls: Vec<Call>,
    failures: Vec<(Op, String, Failure)>,
    access: HashMap<(String, String), AccessDecision>,
    logs: HashMap<(String, String), String>,
    resource_version: u64,
}

impl State {
    fn next_rv(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn take_failure(&mut self, op: Op, name: &str, target: &str) -> Option<Error> {
        let pos = self.failures.iter().position(|(o, n, _)| *o == op && n == name)?;
        let (_, _, failure) = self.failures.remove(pos);
        Some(match failure {
            Failure::Status(code, message) => status_error(op, target.to_string(), code, message),
            Failure::Transport(message) => Error::Transport { op, target: target.to_string(), message },
        })
    }
}

pub struct MemoryBackend {
    default_namespace: String,
    state: Mutex<State>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn key(coords: &ResourceCoordinates, namespace: Option<&str>, name: &str) -> ObjectKey {
    ObjectKey {
        group: coords.group.clone(),
        resource: coords.resource.clone(),
        namespace: namespace.unwrap_or_default().to_string(),
        name: name.to_string(),
    }
}

fn not_found(op: Op, coords: &ResourceCoordinates, namespace: Option<&str>, name: &str) -> Error {
    Error::NotFound {
        op,
        target: coords.describe(namespace, Some(name)),
        message: format!("{} {:?} not found", coords.resource, name),
    }
}

fn set_meta(obj: &mut Json, field: &str, value: Json) {
    if let Some(map) = obj.as_object_mut() {
        let meta = map.entry("metadata").or_insert_with(|| json!({}));
        if let Some(meta) = meta.as_object_mut() {
            meta.insert(field.to_string(), value);
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self { default_namespace: "default".into(), state: Mutex::new(State::default()) }
    }

    pub fn with_default_namespace(mut self, namespace: &str) -> Self {
        self.default_namespace = namespace.to_string();
        self
    }

    /// Seed an object as if it already existed on the server.
    pub async fn insert(&self, coords: &ResourceCoordinates, object: Json) {
        let namespace = object.pointer("/metadata/namespace").and_then(|v| v.as_str()).map(str::to_string);
        let name = object.pointer("/metadata/name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let mut st = self.state.lock().await;
        let mut object = object;
        let rv = st.next_rv();
        set_meta(&mut object, "resourceVersion", Json::String(rv));
        st.objects.insert(key(coords, namespace.as_deref(), &name), object);
    }

    pub async fn object(&self, coords: &ResourceCoordinates, namespace: Option<&str>, name: &str) -> Option<Json> {
        self.state.lock().await.objects.get(&key(coords, namespace, name)).cloned()
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    /// Fail the next `op` on an object called `name` (one shot).
    pub async fn fail_next(&self, op: Op, name: &str, failure: Failure) {
        self.state.lock().await.failures.push((op, name.to_string(), failure));
    }

    pub async fn set_access(&self, verb: &str, resource: &str, decision: AccessDecision) {
        self.state.lock().await.access.insert((verb.to_string(), resource.to_string()), decision);
    }

    pub async fn set_pod_logs(&self, namespace: &str, name: &str, text: &str) {
        self.state.lock().await.logs.insert((namespace.to_string(), name.to_string()), text.to_string());
    }

    async fn record(&self, op: Op, resource: &str, namespace: Option<&str>, name: Option<&str>, fm: Option<&str>) {
        self.state.lock().await.calls.push(Call {
            op,
            resource: resource.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.map(str::to_string),
            field_manager: fm.map(str::to_string),
        });
    }
}

/// Equality-based label selectors: `a=b`, `a==b`, `a!=b`, `a`, `!a`, comma-joined.
fn selector_matches(selector: &str, labels: Option<&serde_json::Map<String, Json>>) -> Result<bool> {
    for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let get = |k: &str| labels.and_then(|l| l.get(k.trim())).and_then(|v| v.as_str());
        let ok = if let Some((k, v)) = term.split_once("!=") {
            get(k) != Some(v.trim())
        } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
            get(k) == Some(v.trim())
        } else if let Some(k) = term.strip_prefix('!') {
            get(k).is_none()
        } else if term.contains(|c: char| c.is_whitespace() || c == '(') {
            return Err(Error::Validation(format!("unsupported label selector term {:?}", term)));
        } else {
            get(term).is_some()
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

#[async_trait::async_trait]
impl ResourceBackend for MemoryBackend {
    fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    async fn get(&self, coords: &ResourceCoordinates, namespace: Option<&str>, name: &str) -> Result<ResourceObject> {
        self.record(Op::Get, &coords.resource, namespace, Some(name), None).await;
        let mut st = self.state.lock().await;
        if let Some(e) = st.take_failure(Op::Get, name, &coords.describe(namespace, Some(name))) {
            return Err(e);
        }
        match st.objects.get(&key(coords, namespace, name)) {
            Some(v) => ResourceObject::try_from(v.clone()),
            None => Err(not_found(Op::Get, coords, namespace, name)),
        }
    }

    async fn list(
        &self,
        coords: &ResourceCoordinates,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<ResourceObject>> {
        self.record(Op::List, &coords.resource, namespace, None, None).await;
        let st = self.state.lock().await;
        let mut out = Vec::new();
        for (k, v) in &st.objects {
            if k.group != coords.group || k.resource != coords.resource {
                continue;
            }
            if let Some(ns) = namespace {
                if k.namespace != ns {
                    continue;
                }
            }
            if let Some(sel) = label_selector {
                let labels = v.pointer("/metadata/labels").and_then(|l| l.as_object());
                if !selector_matches(sel, labels)? {
                    continue;
                }
            }
            let mut item = v.clone();
            // list items come back without type meta, as from a real server
            if let Some(map) = item.as_object_mut() {
                map.remove("apiVersion");
                map.remove("kind");
            }
            out.push(ResourceObject::try_from(item)?);
        }
        Ok(out)
    }

    async fn apply(
        &self,
        coords: &ResourceCoordinates,
        namespace: Option<&str>,
        name: &str,
        object: &ResourceObject,
        field_manager: &str,
        force: bool,
    ) -> Result<ResourceObject> {
        self.record(Op::Apply, &coords.resource, namespace, Some(name), Some(field_manager)).await;
        let mut st = self.state.lock().await;
        let target = coords.describe(namespace, Some(name));
        if let Some(e) = st.take_failure(Op::Apply, name, &target) {
            return Err(e);
        }
        let k = key(coords, namespace, name);
        let mut next = match st.objects.get(&k) {
            Some(existing) => {
                let owner = existing
                    .pointer("/metadata/managedFields/0/manager")
                    .and_then(|m| m.as_str())
                    .unwrap_or(field_manager);
                if owner != field_manager && !force {
                    return Err(Error::Conflict {
                        op: Op::Apply,
                        target,
                        message: format!("Apply failed with 1 conflict: conflict with {:?}", owner),
                    });
                }
                let mut merged = existing.clone();
                json_patch::merge(&mut merged, object.as_value());
                merged
            }
            None => object.as_value().clone(),
        };
        let rv = st.next_rv();
        set_meta(&mut next, "resourceVersion", Json::String(rv));
        set_meta(
            &mut next,
            "managedFields",
            json!([{ "manager": field_manager, "operation": "Apply", "apiVersion": coords.api_version() }]),
        );
        st.objects.insert(k, next.clone());
        ResourceObject::try_from(next)
    }

    async fn delete(&self, coords: &ResourceCoordinates, namespace: Option<&str>, name: &str) -> Result<()> {
        self.record(Op::Delete, &coords.resource, namespace, Some(name), None).await;
        let mut st = self.state.lock().await;
        if let Some(e) = st.take_failure(Op::Delete, name, &coords.describe(namespace, Some(name))) {
            return Err(e);
        }
        match st.objects.remove(&key(coords, namespace, name)) {
            Some(_) => Ok(()),
            None => Err(not_found(Op::Delete, coords, namespace, name)),
        }
    }

    async fn patch(
        &self,
        coords: &ResourceCoordinates,
        namespace: Option<&str>,
        name: &str,
        patch: &Patch<Json>,
    ) -> Result<ResourceObject> {
        self.record(Op::Patch, &coords.resource, namespace, Some(name), None).await;
        let mut st = self.state.lock().await;
        let target = coords.describe(namespace, Some(name));
        if let Some(e) = st.take_failure(Op::Patch, name, &target) {
            return Err(e);
        }
        let k = key(coords, namespace, name);
        let Some(existing) = st.objects.get(&k) else {
            return Err(not_found(Op::Patch, coords, namespace, name));
        };
        let mut next = existing.clone();
        match patch {
            Patch::Strategic(p) | Patch::Merge(p) => json_patch::merge(&mut next, p),
            Patch::Json(ops) => json_patch::patch(&mut next, ops)
                .map_err(|e| Error::Api { op: Op::Patch, target: target.clone(), code: 422, message: e.to_string() })?,
            _ => {
                return Err(Error::Api {
                    op: Op::Patch,
                    target,
                    code: 415,
                    message: "unsupported patch content type".into(),
                })
            }
        }
        let rv = st.next_rv();
        set_meta(&mut next, "resourceVersion", Json::String(rv));
        st.objects.insert(k, next.clone());
        ResourceObject::try_from(next)
    }

    async fn access_review(&self, review: &AccessReview) -> Result<AccessDecision> {
        self.record(Op::AccessReview, &review.resource, review.namespace.as_deref(), review.name.as_deref(), None)
            .await;
        let st = self.state.lock().await;
        Ok(st
            .access
            .get(&(review.verb.clone(), review.resource.clone()))
            .cloned()
            .unwrap_or(AccessDecision { allowed: true, reason: None }))
    }

    async fn pod_logs(&self, namespace: &str, name: &str, opts: &LogOptions) -> Result<String> {
        self.record(Op::Logs, "pods", Some(namespace), Some(name), None).await;
        let st = self.state.lock().await;
        let Some(text) = st.logs.get(&(namespace.to_string(), name.to_string())) else {
            return Err(Error::NotFound {
                op: Op::Logs,
                target: format!("pods/{} in namespace {}", name, namespace),
                message: format!("pods {:?} not found", name),
            });
        };
        Ok(match opts.tail_lines {
            Some(n) if n >= 0 => {
                let lines: Vec<&str> = text.lines().collect();
                let start = lines.len().saturating_sub(n as usize);
                lines[start..].iter().map(|l| format!("{}\n", l)).collect()
            }
            _ => text.clone(),
        })
    }
}
