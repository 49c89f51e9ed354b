//! Resource access engine: identifier resolution, namespace routing and the five verbs.

use std::sync::Arc;
use std::time::Instant;

use kmcp_apply::{parse_document, prepare_patch, split_manifest};
use kmcp_core::columns::{render_columns, render_yaml};
use kmcp_core::{Error, Op, PatchKind, ResourceCoordinates, ResourceObject, Result};
use kmcp_kubehub::{DiscoveredResource, Resolver};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{AccessDecision, AccessReview, LogOptions, ResourceBackend};

pub const DEFAULT_FIELD_MANAGER: &str = "kube-mcp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsSettings {
    /// Server-side apply identity.
    pub field_manager: String,
    /// Drop `metadata.managedFields` from everything handed back to callers.
    pub strip_managed_fields: bool,
}

impl Default for OpsSettings {
    fn default() -> Self {
        Self { field_manager: DEFAULT_FIELD_MANAGER.to_string(), strip_managed_fields: false }
    }
}

/// A get-or-list request as it arrives from a tool call or the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    pub resource: String,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn require_name<'a>(op: Op, resource: &str, name: &'a str) -> Result<&'a str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("resource name must not be empty".into()).in_context(op, resource));
    }
    Ok(name)
}

#[derive(Clone)]
pub struct KubeOps {
    resolver: Resolver,
    backend: Arc<dyn ResourceBackend>,
    settings: OpsSettings,
}

impl KubeOps {
    pub fn new(resolver: Resolver, backend: Arc<dyn ResourceBackend>, settings: OpsSettings) -> Self {
        Self { resolver, backend, settings }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn settings(&self) -> &OpsSettings {
        &self.settings
    }

    /// Cluster-scoped kinds drop the namespace; namespaced kinds keep whatever was given.
    fn route<'a>(&self, coords: &ResourceCoordinates, namespace: Option<&'a str>) -> Option<&'a str> {
        let namespace = non_empty(namespace);
        if coords.is_namespaced() {
            return namespace;
        }
        if let Some(ns) = namespace {
            debug!(gvr = %coords, ns, "cluster-scoped kind; ignoring namespace");
        }
        None
    }

    /// Single-object verbs on namespaced kinds need a namespace.
    fn route_required<'a>(
        &self,
        op: Op,
        coords: &ResourceCoordinates,
        namespace: Option<&'a str>,
        name: &str,
    ) -> Result<Option<&'a str>> {
        let routed = self.route(coords, namespace);
        if coords.is_namespaced() && routed.is_none() {
            return Err(Error::Validation(format!(
                "namespace is required for namespaced resource {}",
                coords.resource
            ))
            .in_context(op, &coords.describe(None, Some(name))));
        }
        Ok(routed)
    }

    fn finish(&self, coords: &ResourceCoordinates, mut obj: ResourceObject) -> ResourceObject {
        obj.ensure_type_meta(&coords.api_version(), &coords.kind);
        if self.settings.strip_managed_fields {
            obj.strip_managed_fields();
        }
        obj
    }

    pub async fn get(&self, resource: &str, namespace: Option<&str>, name: &str) -> Result<ResourceObject> {
        let name = require_name(Op::Get, resource, name)?;
        let coords = self.resolver.resolve(resource).await?;
        let ns = self.route_required(Op::Get, &coords, namespace, name)?;
        let t0 = Instant::now();
        let obj = self.backend.get(&coords, ns, name).await?;
        info!(gvr = %coords, ns = ?ns, name, took_ms = t0.elapsed().as_millis(), "ops: get ok");
        Ok(self.finish(&coords, obj))
    }

    /// Namespaced kinds without a namespace list across all namespaces.
    pub async fn list(
        &self,
        resource: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<ResourceObject>> {
        let coords = self.resolver.resolve(resource).await?;
        let ns = self.route(&coords, namespace);
        let selector = non_empty(label_selector);
        let t0 = Instant::now();
        let items = self.backend.list(&coords, ns, selector).await?;
        info!(
            gvr = %coords,
            ns = ?ns,
            selector = ?selector,
            count = items.len(),
            took_ms = t0.elapsed().as_millis(),
            "ops: list ok"
        );
        Ok(items.into_iter().map(|o| self.finish(&coords, o)).collect())
    }

    /// Get when a name is given, list otherwise.
    pub async fn fetch(&self, req: &GetRequest) -> Result<Vec<ResourceObject>> {
        match non_empty(req.name.as_deref()) {
            Some(name) => Ok(vec![self.get(&req.resource, req.namespace.as_deref(), name).await?]),
            None => self.list(&req.resource, req.namespace.as_deref(), req.label_selector.as_deref()).await,
        }
    }

    /// Apply every document of `manifest` in order, stopping at the first failure.
    ///
    /// Documents before the failing one stay applied.
    pub async fn apply(&self, manifest: &str) -> Result<Vec<ResourceObject>> {
        let docs = split_manifest(manifest);
        if docs.is_empty() {
            return Err(Error::Validation("manifest contains no documents".into()));
        }
        let total = docs.len();
        let mut applied = Vec::with_capacity(total);
        for (i, doc) in docs.iter().enumerate() {
            let index = i + 1;
            match self.apply_document(doc).await {
                Ok(obj) => {
                    counter!("kmcp_apply_documents_total", 1u64);
                    applied.push(obj);
                }
                Err(e) => {
                    warn!(index, total, error = %e, "ops: apply stopped");
                    return Err(Error::ApplyDocument { index, total, source: Box::new(e) });
                }
            }
        }
        Ok(applied)
    }

    async fn apply_document(&self, doc: &str) -> Result<ResourceObject> {
        let parsed = parse_document(doc)?;
        let coords = self.resolver.resolve_gvk(&parsed.gvk).await?;
        let mut object = parsed.object;
        let ns = if coords.is_namespaced() {
            let ns = object.namespace().unwrap_or(self.backend.default_namespace()).to_string();
            object.set_namespace(Some(&ns));
            Some(ns)
        } else {
            if object.namespace().is_some() {
                debug!(gvr = %coords, name = %parsed.name, "cluster-scoped manifest; dropping metadata.namespace");
            }
            object.set_namespace(None);
            None
        };
        let t0 = Instant::now();
        let out = self
            .backend
            .apply(&coords, ns.as_deref(), &parsed.name, &object, &self.settings.field_manager, true)
            .await?;
        info!(
            gvr = %coords,
            ns = ?ns,
            name = %parsed.name,
            field_manager = %self.settings.field_manager,
            took_ms = t0.elapsed().as_millis(),
            "ops: apply ok"
        );
        Ok(self.finish(&coords, out))
    }

    /// Returns the confirmation text once the server accepted the deletion.
    pub async fn delete(&self, resource: &str, namespace: Option<&str>, name: &str) -> Result<String> {
        let name = require_name(Op::Delete, resource, name)?;
        let coords = self.resolver.resolve(resource).await?;
        let ns = self.route_required(Op::Delete, &coords, namespace, name)?;
        let t0 = Instant::now();
        self.backend.delete(&coords, ns, name).await?;
        info!(gvr = %coords, ns = ?ns, name, took_ms = t0.elapsed().as_millis(), "ops: delete ok");
        Ok(format!("Resource {}/{} deleted.", coords.resource, name))
    }

    /// `kind` is the literal from the caller; empty means strategic.
    pub async fn patch(
        &self,
        resource: &str,
        namespace: Option<&str>,
        name: &str,
        body: &str,
        kind: &str,
    ) -> Result<ResourceObject> {
        let name = require_name(Op::Patch, resource, name)?;
        let target = format!("{}/{}", resource, name);
        let kind = PatchKind::parse(kind.trim()).map_err(|e| e.in_context(Op::Patch, &target))?;
        let patch = prepare_patch(kind, body).map_err(|e| e.in_context(Op::Patch, &target))?;
        let coords = self.resolver.resolve(resource).await?;
        let ns = self.route_required(Op::Patch, &coords, namespace, name)?;
        let t0 = Instant::now();
        let obj = self.backend.patch(&coords, ns, name, &patch).await?;
        info!(
            gvr = %coords,
            ns = ?ns,
            name,
            patch_type = %kind,
            took_ms = t0.elapsed().as_millis(),
            "ops: patch ok"
        );
        Ok(self.finish(&coords, obj))
    }

    pub async fn api_resources(&self) -> Result<Vec<DiscoveredResource>> {
        self.resolver.api_resources().await
    }

    pub async fn can_i(&self, review: &AccessReview) -> Result<AccessDecision> {
        if review.verb.trim().is_empty() || review.resource.trim().is_empty() {
            return Err(Error::Validation("verb and resource are required".into()));
        }
        let decision = self.backend.access_review(review).await?;
        debug!(verb = %review.verb, resource = %review.resource, allowed = decision.allowed, "ops: access review");
        Ok(decision)
    }

    /// Falls back to the client's default namespace.
    pub async fn pod_logs(&self, namespace: Option<&str>, name: &str, opts: &LogOptions) -> Result<String> {
        let name = require_name(Op::Logs, "pods", name)?;
        let ns = non_empty(namespace).unwrap_or(self.backend.default_namespace()).to_string();
        let t0 = Instant::now();
        let text = self.backend.pod_logs(&ns, name, opts).await?;
        info!(ns = %ns, pod = name, bytes = text.len(), took_ms = t0.elapsed().as_millis(), "ops: logs ok");
        Ok(text)
    }

    /// YAML stream, or a custom-columns table when `columns` is set.
    pub fn render(&self, objects: &[ResourceObject], columns: Option<&str>) -> Result<String> {
        match non_empty(columns) {
            Some(spec) => render_columns(objects, spec),
            None => render_yaml(objects),
        }
    }
}
