//! `ResourceBackend` over kube-rs' dynamic API.

use k8s_openapi::api::authorization::v1::{ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec};
use k8s_openapi::api::core::v1::Pod;
use kmcp_core::{Error, Op, ResourceCoordinates, ResourceObject, Result};
use kmcp_kubehub::api_resource;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::Value as Json;
use tracing::debug;

use crate::backend::{status_error, AccessDecision, AccessReview, LogOptions, ResourceBackend};

/// Classify a kube error: API status codes keep their meaning, everything else is transport.
pub fn classify(op: Op, target: String, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) => status_error(op, target, resp.code, resp.message),
        other => Error::Transport { op, target, message: other.to_string() },
    }
}

pub struct KubeBackend {
    client: Client,
}

impl KubeBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, coords: &ResourceCoordinates, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(coords);
        match namespace {
            Some(ns) if coords.is_namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn to_object(obj: DynamicObject) -> Result<ResourceObject> {
    let v = serde_json::to_value(&obj).map_err(|e| Error::Encode(format!("serializing DynamicObject: {}", e)))?;
    ResourceObject::try_from(v)
}

#[async_trait::async_trait]
impl ResourceBackend for KubeBackend {
    fn default_namespace(&self) -> &str {
        self.client.default_namespace()
    }

    async fn get(&self, coords: &ResourceCoordinates, namespace: Option<&str>, name: &str) -> Result<ResourceObject> {
        let obj = self
            .api(coords, namespace)
            .get(name)
            .await
            .map_err(|e| classify(Op::Get, coords.describe(namespace, Some(name)), e))?;
        to_object(obj)
    }

    async fn list(
        &self,
        coords: &ResourceCoordinates,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<ResourceObject>> {
        let mut lp = ListParams::default();
        if let Some(sel) = label_selector {
            lp = lp.labels(sel);
        }
        let list = self
            .api(coords, namespace)
            .list(&lp)
            .await
            .map_err(|e| classify(Op::List, coords.describe(namespace, None), e))?;
        debug!(gvr = %coords, count = list.items.len(), "list: received");
        list.items.into_iter().map(to_object).collect()
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
        let mut pp = PatchParams::apply(field_manager);
        if force {
            pp = pp.force();
        }
        let obj = self
            .api(coords, namespace)
            .patch(name, &pp, &Patch::Apply(object.as_value()))
            .await
            .map_err(|e| classify(Op::Apply, coords.describe(namespace, Some(name)), e))?;
        to_object(obj)
    }

    async fn delete(&self, coords: &ResourceCoordinates, namespace: Option<&str>, name: &str) -> Result<()> {
        self.api(coords, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify(Op::Delete, coords.describe(namespace, Some(name)), e))?;
        Ok(())
    }

    async fn patch(
        &self,
        coords: &ResourceCoordinates,
        namespace: Option<&str>,
        name: &str,
        patch: &Patch<Json>,
    ) -> Result<ResourceObject> {
        let obj = self
            .api(coords, namespace)
            .patch(name, &PatchParams::default(), patch)
            .await
            .map_err(|e| classify(Op::Patch, coords.describe(namespace, Some(name)), e))?;
        to_object(obj)
    }

    async fn access_review(&self, review: &AccessReview) -> Result<AccessDecision> {
        let api: Api<SelfSubjectAccessReview> = Api::all(self.client.clone());
        let ra = ResourceAttributes {
            group: review.group.clone().filter(|g| !g.is_empty()),
            resource: Some(review.resource.clone()),
            subresource: review.subresource.clone(),
            verb: Some(review.verb.clone()),
            name: review.name.clone(),
            namespace: review.namespace.clone(),
            ..Default::default()
        };
        let ssar = SelfSubjectAccessReview {
            spec: SelfSubjectAccessReviewSpec { resource_attributes: Some(ra), ..Default::default() },
            ..Default::default()
        };
        let created = api
            .create(&PostParams::default(), &ssar)
            .await
            .map_err(|e| classify(Op::AccessReview, format!("{} {}", review.verb, review.resource), e))?;
        let status = created.status.unwrap_or_default();
        Ok(AccessDecision { allowed: status.allowed, reason: status.reason })
    }

    async fn pod_logs(&self, namespace: &str, name: &str, opts: &LogOptions) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = LogParams {
            container: opts.container.clone(),
            previous: opts.previous,
            tail_lines: opts.tail_lines,
            ..Default::default()
        };
        api.logs(name, &lp)
            .await
            .map_err(|e| classify(Op::Logs, format!("pods/{} in namespace {}", name, namespace), e))
    }
}
