//! kube-mcp kubehub: client bootstrap, discovery and resource type resolution.

#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use kmcp_core::ResourceCoordinates;
use kube::{core::ApiResource, Client, Config};
use tracing::info;

pub mod cache;
pub mod discovery;
pub mod index;
pub mod resolver;

pub use cache::{DiscoveryCache, Snapshot};
pub use discovery::{Discovered, DiscoveredResource, DiscoverySource, KubeDiscovery, StaticDiscovery};
pub use index::DiscoveryIndex;
pub use resolver::{render_api_resources, Resolver};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a client from the ambient kubeconfig / in-cluster environment.
///
/// `timeout` bounds each read from the API server.
pub async fn get_kube_client(timeout: Duration) -> Result<Client> {
    let mut config = Config::infer().await.context("loading kubeconfig")?;
    config.read_timeout = Some(timeout);
    config.connect_timeout = Some(CONNECT_TIMEOUT.min(timeout));
    info!(cluster = %config.cluster_url, ns = %config.default_namespace, timeout_s = timeout.as_secs(), "kube client configured");
    Client::try_from(config).context("creating kube client")
}

/// Dynamic-API type descriptor for resolved coordinates.
pub fn api_resource(coords: &ResourceCoordinates) -> ApiResource {
    ApiResource {
        group: coords.group.clone(),
        version: coords.version.clone(),
        api_version: coords.api_version(),
        kind: coords.kind.clone(),
        plural: coords.resource.clone(),
    }
}
