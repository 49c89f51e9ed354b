//! Resource type resolution: free-form identifier or GVK to REST coordinates.

use std::sync::Arc;

use kmcp_core::{Error, GroupVersionKind, ResourceCoordinates, Result};
use tracing::debug;

use crate::cache::DiscoveryCache;
use crate::discovery::DiscoveredResource;

#[derive(Clone)]
pub struct Resolver {
    cache: Arc<DiscoveryCache>,
}

impl Resolver {
    pub fn new(cache: Arc<DiscoveryCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<DiscoveryCache> {
        &self.cache
    }

    /// Resolve `pods`, `pod`, `Pod` or `po` style identifiers.
    ///
    /// A miss forces one cache refresh and a retry; a second miss is `ResourceKindNotFound`.
    pub async fn resolve(&self, identifier: &str) -> Result<ResourceCoordinates> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(Error::Validation("resource type must not be empty".into()));
        }
        let snap = self.cache.snapshot().await?;
        if let Some(r) = snap.index.lookup(identifier) {
            return Ok(r.coordinates());
        }
        debug!(identifier, epoch = snap.epoch, "resolve: miss; refreshing discovery");
        let snap = self.cache.refresh_after(snap.epoch).await?;
        match snap.index.lookup(identifier) {
            Some(r) => Ok(r.coordinates()),
            None => Err(Error::ResourceKindNotFound {
                identifier: identifier.to_string(),
                suggestion: snap.index.suggest(identifier),
            }),
        }
    }

    /// Resolve a manifest's `apiVersion`/`kind`; any served version matches.
    pub async fn resolve_gvk(&self, gvk: &GroupVersionKind) -> Result<ResourceCoordinates> {
        let snap = self.cache.snapshot().await?;
        if let Some(r) = snap.index.lookup_gvk(gvk) {
            return Ok(r.coordinates());
        }
        debug!(gvk = %gvk, epoch = snap.epoch, "resolve: gvk miss; refreshing discovery");
        let snap = self.cache.refresh_after(snap.epoch).await?;
        match snap.index.lookup_gvk(gvk) {
            Some(r) => Ok(r.coordinates()),
            None => Err(Error::ResourceKindNotFound {
                identifier: gvk.to_string(),
                suggestion: snap.index.suggest(&gvk.kind),
            }),
        }
    }

    /// Every served resource type (all versions) from a fresh discovery round.
    pub async fn api_resources(&self) -> Result<Vec<DiscoveredResource>> {
        let snap = self.cache.refresh().await?;
        Ok(snap.index.resources().to_vec())
    }
}

/// `NAME  SHORTNAMES  APIVERSION  NAMESPACED  KIND`, tab-separated, one line per type.
pub fn render_api_resources(resources: &[DiscoveredResource]) -> String {
    let mut out = String::from("NAME\tSHORTNAMES\tAPIVERSION\tNAMESPACED\tKIND\n");
    for r in resources {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\n",
            r.name,
            r.short_names.join(","),
            r.api_version(),
            r.namespaced,
            r.kind
        ));
    }
    out
}
