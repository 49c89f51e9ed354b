//! Discovery sources: where the list of served resource types comes from.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::{ArcSwap, ArcSwapOption};
use futures::{stream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIGroupList, APIResourceList, APIVersions};
use kmcp_core::{Error, ResourceCoordinates, Result, Scope};
use kube::Client;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

/// Concurrent group-version fetches during one discovery round.
const DISCOVERY_CONCURRENCY: usize = 16;

/// One served resource type as reported by the API server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub group: String,
    pub version: String,
    /// Plural resource name (`deployments`).
    pub name: String,
    pub singular_name: String,
    pub kind: String,
    pub namespaced: bool,
    pub short_names: SmallVec<[String; 2]>,
    pub verbs: Vec<String>,
    /// Whether `version` is the server-preferred version of its group.
    pub preferred: bool,
}

impl DiscoveredResource {
    /// Minimal constructor used by fixtures; singular defaults to the lower-cased kind.
    pub fn new(group: &str, version: &str, name: &str, kind: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            name: name.to_string(),
            singular_name: kind.to_lowercase(),
            kind: kind.to_string(),
            namespaced,
            short_names: SmallVec::new(),
            verbs: ["get", "list", "watch", "create", "update", "patch", "delete"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            preferred: true,
        }
    }

    pub fn with_short_names(mut self, names: &[&str]) -> Self {
        self.short_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_singular(mut self, singular: &str) -> Self {
        self.singular_name = singular.to_string();
        self
    }

    pub fn not_preferred(mut self) -> Self {
        self.preferred = false;
        self
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.kind)
    }

    pub fn coordinates(&self) -> ResourceCoordinates {
        ResourceCoordinates {
            group: self.group.clone(),
            version: self.version.clone(),
            resource: self.name.clone(),
            kind: self.kind.clone(),
            scope: if self.namespaced { Scope::Namespaced } else { Scope::Cluster },
        }
    }

    /// Identifiers this resource answers to, in match priority order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        [self.kind.as_str(), self.name.as_str(), self.singular_name.as_str()]
            .into_iter()
            .chain(self.short_names.iter().map(|s| s.as_str()))
            .filter(|s| !s.is_empty())
    }
}

/// Result of one discovery round: resources in listing order plus soft failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    pub resources: Vec<DiscoveredResource>,
    /// Group-versions (`metrics.k8s.io/v1beta1`) whose listing failed.
    pub failed: Vec<String>,
}

/// Something that can list the resource types a cluster serves.
#[async_trait::async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn discover(&self) -> Result<Discovered>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupVersion {
    group: String,
    version: String,
    preferred: bool,
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

/// Listing order: core versions first, then every group in server order with its preferred
/// version ahead of the rest.
fn plan_group_versions(core: &APIVersions, groups: &APIGroupList) -> Vec<GroupVersion> {
    let mut out = Vec::new();
    for (i, v) in core.versions.iter().enumerate() {
        out.push(GroupVersion { group: String::new(), version: v.clone(), preferred: i == 0 });
    }
    for g in &groups.groups {
        let preferred = g
            .preferred_version
            .as_ref()
            .or_else(|| g.versions.first())
            .map(|p| p.version.clone());
        if let Some(p) = &preferred {
            out.push(GroupVersion { group: g.name.clone(), version: p.clone(), preferred: true });
        }
        for v in &g.versions {
            if preferred.as_deref() != Some(v.version.as_str()) {
                out.push(GroupVersion { group: g.name.clone(), version: v.version.clone(), preferred: false });
            }
        }
    }
    out
}

/// Run `fetch` for every target with bounded concurrency; results come back in target order.
async fn fetch_in_order<F, Fut, T>(targets: &[GroupVersion], fetch: F) -> Vec<T>
where
    F: Fn(GroupVersion) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(targets.iter().cloned().map(fetch))
        .buffered(DISCOVERY_CONCURRENCY)
        .collect()
        .await
}

/// Fold per-group-version results into one round. Only a total wipe-out is an error.
fn assemble(
    targets: &[GroupVersion],
    results: Vec<std::result::Result<APIResourceList, String>>,
) -> Result<Discovered> {
    let mut out = Discovered::default();
    for (gv, res) in targets.iter().zip(results) {
        match res {
            Ok(list) => out.resources.extend(convert_list(gv, list)),
            Err(e) => {
                warn!(gv = %gv, error = %e, "discovery: group-version failed; continuing without it");
                out.failed.push(gv.to_string());
            }
        }
    }
    if !targets.is_empty() && out.failed.len() == targets.len() {
        return Err(Error::DiscoveryUnavailable(format!(
            "all {} group-versions failed to list",
            targets.len()
        )));
    }
    Ok(out)
}

/// Live discovery against the API server's `/api` and `/apis` endpoints.
#[derive(Clone)]
pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn group_versions(&self) -> Result<Vec<GroupVersion>> {
        let core = self
            .client
            .list_core_api_versions()
            .await
            .map_err(|e| Error::DiscoveryUnavailable(format!("listing core API versions: {}", e)))?;
        let groups = self
            .client
            .list_api_groups()
            .await
            .map_err(|e| Error::DiscoveryUnavailable(format!("listing API groups: {}", e)))?;
        Ok(plan_group_versions(&core, &groups))
    }
}

async fn fetch_resources(client: &Client, gv: &GroupVersion) -> std::result::Result<APIResourceList, kube::Error> {
    if gv.group.is_empty() {
        client.list_core_api_resources(&gv.version).await
    } else {
        client.list_api_group_resources(&gv.to_string()).await
    }
}

fn convert_list(gv: &GroupVersion, list: APIResourceList) -> impl Iterator<Item = DiscoveredResource> + '_ {
    list.resources
        .into_iter()
        // subresources (`pods/log`, `deployments/scale`) are not addressable by themselves
        .filter(|r| !r.name.contains('/'))
        .map(move |r| DiscoveredResource {
            group: gv.group.clone(),
            version: gv.version.clone(),
            singular_name: if r.singular_name.is_empty() { r.kind.to_lowercase() } else { r.singular_name },
            name: r.name,
            kind: r.kind,
            namespaced: r.namespaced,
            short_names: r.short_names.unwrap_or_default().into_iter().collect(),
            verbs: r.verbs,
            preferred: gv.preferred,
        })
}

#[async_trait::async_trait]
impl DiscoverySource for KubeDiscovery {
    async fn discover(&self) -> Result<Discovered> {
        let t0 = Instant::now();
        let targets = self.group_versions().await?;
        debug!(group_versions = targets.len(), "discovery: listing resources");

        let results = fetch_in_order(&targets, |gv| {
            let client = self.client.clone();
            async move { fetch_resources(&client, &gv).await.map_err(|e| e.to_string()) }
        })
        .await;

        let out = assemble(&targets, results)?;
        if !out.failed.is_empty() {
            counter!("kmcp_discovery_partial_total", 1u64);
        }
        let took_ms = t0.elapsed().as_millis();
        histogram!("kmcp_discovery_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(resources = out.resources.len(), failed = out.failed.len(), took_ms = %took_ms, "discovery: done");
        Ok(out)
    }
}

/// In-memory discovery source with a call counter; swap contents to simulate CRD installs.
pub struct StaticDiscovery {
    discovered: ArcSwap<Discovered>,
    failure: ArcSwapOption<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticDiscovery {
    pub fn new(resources: Vec<DiscoveredResource>) -> Self {
        Self {
            discovered: ArcSwap::from_pointee(Discovered { resources, failed: Vec::new() }),
            failure: ArcSwapOption::empty(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A small cluster's worth of built-in types, listed core first like a real server.
    pub fn standard() -> Self {
        Self::new(standard_resources())
    }

    /// Sleep inside every `discover` call, so concurrent callers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_resources(&self, resources: Vec<DiscoveredResource>) {
        let failed = self.discovered.load().failed.clone();
        self.discovered.store(Arc::new(Discovered { resources, failed }));
    }

    pub fn push_resource(&self, resource: DiscoveredResource) {
        let mut next = Discovered::clone(&self.discovered.load());
        next.resources.push(resource);
        self.discovered.store(Arc::new(next));
    }

    pub fn set_failed_group_versions(&self, failed: Vec<String>) {
        let mut next = Discovered::clone(&self.discovered.load());
        next.failed = failed;
        self.discovered.store(Arc::new(next));
    }

    /// Make every subsequent `discover` fail with `DiscoveryUnavailable(reason)`.
    pub fn fail_with(&self, reason: Option<&str>) {
        self.failure.store(reason.map(|s| Arc::new(s.to_string())));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DiscoverySource for StaticDiscovery {
    async fn discover(&self) -> Result<Discovered> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if let Some(reason) = self.failure.load_full() {
            return Err(Error::DiscoveryUnavailable(reason.to_string()));
        }
        Ok(Discovered::clone(&self.discovered.load()))
    }
}

fn standard_resources() -> Vec<DiscoveredResource> {
    vec![
        DiscoveredResource::new("", "v1", "pods", "Pod", true).with_short_names(&["po"]),
        DiscoveredResource::new("", "v1", "services", "Service", true).with_short_names(&["svc"]),
        DiscoveredResource::new("", "v1", "configmaps", "ConfigMap", true).with_short_names(&["cm"]),
        DiscoveredResource::new("", "v1", "secrets", "Secret", true),
        DiscoveredResource::new("", "v1", "namespaces", "Namespace", false).with_short_names(&["ns"]),
        DiscoveredResource::new("", "v1", "nodes", "Node", false).with_short_names(&["no"]),
        DiscoveredResource::new("", "v1", "events", "Event", true).with_short_names(&["ev"]),
        DiscoveredResource::new("apps", "v1", "deployments", "Deployment", true).with_short_names(&["deploy"]),
        DiscoveredResource::new("apps", "v1", "statefulsets", "StatefulSet", true).with_short_names(&["sts"]),
        DiscoveredResource::new("apps", "v1", "daemonsets", "DaemonSet", true).with_short_names(&["ds"]),
        DiscoveredResource::new("apps", "v1", "replicasets", "ReplicaSet", true).with_short_names(&["rs"]),
        DiscoveredResource::new("events.k8s.io", "v1", "events", "Event", true).with_short_names(&["ev"]),
        DiscoveredResource::new("autoscaling", "v2", "horizontalpodautoscalers", "HorizontalPodAutoscaler", true)
            .with_short_names(&["hpa"]),
        DiscoveredResource::new("autoscaling", "v1", "horizontalpodautoscalers", "HorizontalPodAutoscaler", true)
            .with_short_names(&["hpa"])
            .not_preferred(),
        DiscoveredResource::new("batch", "v1", "jobs", "Job", true),
        DiscoveredResource::new("batch", "v1", "cronjobs", "CronJob", true).with_short_names(&["cj"]),
        DiscoveredResource::new("networking.k8s.io", "v1", "ingresses", "Ingress", true).with_short_names(&["ing"]),
        DiscoveredResource::new("rbac.authorization.k8s.io", "v1", "clusterroles", "ClusterRole", false),
    ]
}
