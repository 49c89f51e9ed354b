use std::sync::Arc;
use std::time::Duration;

use kmcp_core::{Error, GroupVersionKind, Scope};
use kmcp_kubehub::{DiscoveredResource, DiscoveryCache, Resolver, StaticDiscovery};

fn resolver_with(src: Arc<StaticDiscovery>) -> Resolver {
    Resolver::new(Arc::new(DiscoveryCache::new(src)))
}

#[tokio::test]
async fn plural_singular_kind_and_short_name_agree() {
    let r = resolver_with(Arc::new(StaticDiscovery::standard()));
    let plural = r.resolve("pods").await.unwrap();
    for id in ["pod", "po", "Pod"] {
        assert_eq!(r.resolve(id).await.unwrap(), plural, "{}", id);
    }
    assert_eq!(plural.resource, "pods");
    assert_eq!(plural.api_version(), "v1");
    assert_eq!(plural.scope, Scope::Namespaced);
}

#[tokio::test]
async fn repeated_resolution_is_stable_within_an_epoch() {
    let src = Arc::new(StaticDiscovery::standard());
    let r = resolver_with(src.clone());
    let first = r.resolve("deploy").await.unwrap();
    let epoch = r.cache().epoch();
    for _ in 0..5 {
        assert_eq!(r.resolve("deploy").await.unwrap(), first);
    }
    assert_eq!(r.cache().epoch(), epoch);
    assert_eq!(src.calls(), 1);
    assert_eq!(first.to_string(), "apps/v1/deployments");
}

#[tokio::test]
async fn miss_refreshes_once_and_finds_new_type() {
    let src = Arc::new(StaticDiscovery::standard());
    let r = resolver_with(src.clone());
    r.resolve("pods").await.unwrap();

    // a CRD installed after the cache was populated
    src.push_resource(
        DiscoveredResource::new("example.com", "v1", "widgets", "Widget", true).with_short_names(&["wg"]),
    );
    let c = r.resolve("wg").await.unwrap();
    assert_eq!(c.api_version(), "example.com/v1");
    assert_eq!(src.calls(), 2);
}

#[tokio::test]
async fn unknown_identifier_costs_exactly_one_refresh() {
    let src = Arc::new(StaticDiscovery::standard());
    let r = resolver_with(src.clone());
    let err = r.resolve("deploymnt").await.unwrap_err();
    match &err {
        Error::ResourceKindNotFound { identifier, suggestion } => {
            assert_eq!(identifier, "deploymnt");
            assert!(suggestion.is_some());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // initial population + one refresh-on-miss
    assert_eq!(src.calls(), 2);
}

#[tokio::test]
async fn concurrent_misses_share_one_refresh() {
    let src = Arc::new(StaticDiscovery::standard().with_delay(Duration::from_millis(30)));
    let r = resolver_with(src.clone());
    r.resolve("pods").await.unwrap();
    assert_eq!(src.calls(), 1);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let r = r.clone();
            tokio::spawn(async move { r.resolve("nosuchthing").await })
        })
        .collect();
    for t in tasks {
        assert!(t.await.unwrap().is_err());
    }
    assert_eq!(src.calls(), 2);
}

#[tokio::test]
async fn cluster_scope_is_reported() {
    let r = resolver_with(Arc::new(StaticDiscovery::standard()));
    assert_eq!(r.resolve("nodes").await.unwrap().scope, Scope::Cluster);
    assert_eq!(r.resolve("ns").await.unwrap().scope, Scope::Cluster);
}

#[tokio::test]
async fn ambiguous_identifier_follows_listing_order() {
    // `events` exists in the core group and in events.k8s.io; the core group is listed first
    let r = resolver_with(Arc::new(StaticDiscovery::standard()));
    assert_eq!(r.resolve("events").await.unwrap().group, "");
    assert_eq!(r.resolve("ev").await.unwrap().group, "");
}

#[tokio::test]
async fn gvk_resolution_covers_non_preferred_versions() {
    let r = resolver_with(Arc::new(StaticDiscovery::standard()));
    let gvk = GroupVersionKind::from_api_version("autoscaling/v1", "HorizontalPodAutoscaler");
    assert_eq!(r.resolve_gvk(&gvk).await.unwrap().version, "v1");
    assert_eq!(r.resolve("hpa").await.unwrap().version, "v2");

    let missing = GroupVersionKind::from_api_version("apps/v1beta9", "Deployment");
    assert!(matches!(r.resolve_gvk(&missing).await, Err(Error::ResourceKindNotFound { .. })));
}

#[tokio::test]
async fn discovery_outage_is_fatal_on_cold_cache() {
    let src = Arc::new(StaticDiscovery::standard());
    src.fail_with(Some("dial tcp: connection refused"));
    let r = resolver_with(src);
    assert!(matches!(r.resolve("pods").await, Err(Error::DiscoveryUnavailable(_))));
}

#[tokio::test]
async fn partial_discovery_still_resolves() {
    let src = Arc::new(StaticDiscovery::standard());
    src.set_failed_group_versions(vec!["metrics.k8s.io/v1beta1".into()]);
    let r = resolver_with(src);
    assert!(r.resolve("deployments").await.is_ok());
    let snap = r.cache().current().unwrap();
    assert_eq!(snap.index.failed_group_versions(), &["metrics.k8s.io/v1beta1".to_string()]);
}

#[tokio::test]
async fn empty_identifier_is_rejected_without_discovery() {
    let src = Arc::new(StaticDiscovery::standard());
    let r = resolver_with(src.clone());
    assert!(matches!(r.resolve("  ").await, Err(Error::Validation(_))));
    assert_eq!(src.calls(), 0);
}
