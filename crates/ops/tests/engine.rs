use std::sync::Arc;

use kmcp_core::{Error, Op};
use kmcp_kubehub::{DiscoveryCache, Resolver, StaticDiscovery};
use kmcp_ops::{AccessDecision, AccessReview, Failure, GetRequest, KubeOps, MemoryBackend, OpsSettings};
use serde_json::json;

fn engine_with(backend: Arc<MemoryBackend>, settings: OpsSettings) -> KubeOps {
    let cache = Arc::new(DiscoveryCache::new(Arc::new(StaticDiscovery::standard())));
    KubeOps::new(Resolver::new(cache), backend, settings)
}

fn engine(backend: Arc<MemoryBackend>) -> KubeOps {
    engine_with(backend, OpsSettings::default())
}

async fn seed(ops: &KubeOps, backend: &MemoryBackend, resource: &str, obj: serde_json::Value) {
    let coords = ops.resolver().resolve(resource).await.unwrap();
    backend.insert(&coords, obj).await;
}

fn pod(ns: &str, name: &str, app: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": ns, "labels": { "app": app } },
        "spec": { "containers": [{ "name": "main", "image": format!("{}:1.0", app) }] }
    })
}

fn deployment(name: &str) -> serde_json::Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": "default" },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name } },
                "spec": { "containers": [{ "name": "web", "image": "nginx:1.25" }] }
            }
        }
    })
}

#[tokio::test]
async fn list_pods_in_namespace_renders_yaml_stream() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    seed(&ops, &backend, "pods", pod("default", "web-0", "web")).await;
    seed(&ops, &backend, "pods", pod("default", "web-1", "web")).await;
    seed(&ops, &backend, "pods", pod("kube-system", "dns-0", "dns")).await;

    let req = GetRequest { resource: "pods".into(), namespace: Some("default".into()), ..Default::default() };
    let items = ops.fetch(&req).await.unwrap();
    assert_eq!(items.len(), 2);

    let out = ops.render(&items, None).unwrap();
    assert_eq!(out.matches("---\n").count(), 1);
    assert!(out.contains("name: web-0"));
    assert!(out.contains("name: web-1"));
    assert!(!out.contains("dns-0"));
}

#[tokio::test]
async fn list_without_namespace_spans_all_namespaces() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    seed(&ops, &backend, "pods", pod("default", "web-0", "web")).await;
    seed(&ops, &backend, "pods", pod("kube-system", "dns-0", "dns")).await;

    let items = ops.list("po", None, None).await.unwrap();
    assert_eq!(items.len(), 2);
    let calls = backend.calls().await;
    assert_eq!(calls.last().unwrap().namespace, None);
}

#[tokio::test]
async fn label_selector_and_custom_columns() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    seed(&ops, &backend, "pods", pod("default", "web-0", "web")).await;
    seed(&ops, &backend, "pods", pod("default", "api-0", "api")).await;

    let items = ops.list("pods", Some("default"), Some("app=web")).await.unwrap();
    let table = ops
        .render(&items, Some("NAME:.metadata.name,IMAGE:.spec.containers[0].image,NODE:.spec.nodeName"))
        .unwrap();
    assert_eq!(table, "NAME\tIMAGE\tNODE\nweb-0\tweb:1.0\t<none>\n");
}

#[tokio::test]
async fn malformed_column_path_fails_whole_render() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    seed(&ops, &backend, "pods", pod("default", "web-0", "web")).await;
    let items = ops.list("pods", Some("default"), None).await.unwrap();
    let err = ops.render(&items, Some("NAME:.metadata.name,ALL:.spec.containers[*].image")).unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{:?}", err);
}

#[tokio::test]
async fn list_items_get_type_meta_and_managed_fields_stripped() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine_with(backend.clone(), OpsSettings { strip_managed_fields: true, ..Default::default() });
    let mut p = pod("default", "web-0", "web");
    p["metadata"]["managedFields"] = json!([{ "manager": "kubectl" }]);
    seed(&ops, &backend, "pods", p).await;

    let items = ops.list("pods", Some("default"), None).await.unwrap();
    let v = items[0].as_value();
    assert_eq!(v["apiVersion"], "v1");
    assert_eq!(v["kind"], "Pod");
    assert!(v.pointer("/metadata/managedFields").is_none());
}

#[tokio::test]
async fn managed_fields_kept_by_default() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    let mut p = pod("default", "web-0", "web");
    p["metadata"]["managedFields"] = json!([{ "manager": "kubectl" }]);
    seed(&ops, &backend, "pods", p).await;
    let obj = ops.get("pods", Some("default"), "web-0").await.unwrap();
    assert!(obj.as_value().pointer("/metadata/managedFields").is_some());
}

#[tokio::test]
async fn apply_stops_at_invalid_document() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    let manifest = "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: first
data:
  k: v
---
apiVersion: v1
metadata:
  name: second
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: third
";
    let err = ops.apply(manifest).await.unwrap_err();
    match &err {
        Error::ApplyDocument { index, total, source } => {
            assert_eq!((*index, *total), (2, 3));
            assert!(matches!(**source, Error::Validation(_)), "{:?}", source);
        }
        other => panic!("unexpected {:?}", other),
    }

    let cm = ops.resolver().resolve("configmaps").await.unwrap();
    assert!(backend.object(&cm, Some("default"), "first").await.is_some());
    assert!(backend.object(&cm, Some("default"), "third").await.is_none());
    let applies: Vec<_> = backend.calls().await.into_iter().filter(|c| c.op == Op::Apply).collect();
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].field_manager.as_deref(), Some("kube-mcp"));
}

#[tokio::test]
async fn apply_reports_server_failure_with_index() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    backend.fail_next(Op::Apply, "b", Failure::Status(403, "forbidden".into())).await;
    let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";
    let err = ops.apply(manifest).await.unwrap_err();
    assert!(err.to_string().starts_with("apply document 2 of 2 failed"), "{}", err);
    assert_eq!(err.class(), "api");
}

#[tokio::test]
async fn apply_fills_default_namespace_and_returns_in_order() {
    let backend = Arc::new(MemoryBackend::new().with_default_namespace("team-a"));
    let ops = engine(backend.clone());
    let manifest = "\
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
data:
  mode: fast
---
apiVersion: v1
kind: Namespace
metadata:
  name: team-b
  namespace: ignored
";
    let out = ops.apply(manifest).await.unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].name(), Some("settings"));
    assert_eq!(out[0].namespace(), Some("team-a"));
    assert!(out[0].as_value().pointer("/metadata/resourceVersion").is_some());
    assert_eq!(out[1].kind(), Some("Namespace"));
    assert_eq!(out[1].namespace(), None);

    let calls = backend.calls().await;
    assert_eq!(calls[1].namespace, None);
}

#[tokio::test]
async fn apply_of_empty_manifest_is_rejected() {
    let ops = engine(Arc::new(MemoryBackend::new()));
    let err = ops.apply("---\n# nothing here\n---\n").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn apply_with_unknown_kind_is_resolution_error() {
    let ops = engine(Arc::new(MemoryBackend::new()));
    let err = ops
        .apply("apiVersion: example.com/v1\nkind: Widget\nmetadata:\n  name: w\n")
        .await
        .unwrap_err();
    assert_eq!(err.class(), "resolution");
}

#[tokio::test]
async fn delete_confirms_with_plural_and_missing_is_not_found() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    seed(&ops, &backend, "pods", pod("default", "web-0", "web")).await;

    let msg = ops.delete("po", Some("default"), "web-0").await.unwrap();
    assert_eq!(msg, "Resource pods/web-0 deleted.");

    let err = ops.delete("pods", Some("default"), "web-0").await.unwrap_err();
    assert!(err.is_not_found(), "{:?}", err);
}

#[tokio::test]
async fn json_patch_replaces_only_replicas() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    seed(&ops, &backend, "deployments", deployment("web")).await;

    let before = ops.get("deploy", Some("default"), "web").await.unwrap();
    let after = ops
        .patch(
            "deployments",
            Some("default"),
            "web",
            r#"[{"op":"replace","path":"/spec/replicas","value":3}]"#,
            "json",
        )
        .await
        .unwrap();
    assert_eq!(after.as_value()["spec"]["replicas"], 3);
    assert_eq!(after.as_value()["spec"]["template"], before.as_value()["spec"]["template"]);
    assert_eq!(after.as_value()["spec"]["selector"], before.as_value()["spec"]["selector"]);
}

#[tokio::test]
async fn json_patch_on_missing_path_changes_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    seed(&ops, &backend, "deployments", deployment("web")).await;
    let body = r#"[{"op":"replace","path":"/spec/replicas","value":5},{"op":"remove","path":"/spec/paused"}]"#;
    let err = ops.patch("deployments", Some("default"), "web", body, "json").await.unwrap_err();
    assert_eq!(err.class(), "api");
    let now = ops.get("deployments", Some("default"), "web").await.unwrap();
    assert_eq!(now.as_value()["spec"]["replicas"], 1);
}

#[tokio::test]
async fn empty_patch_type_behaves_like_strategic() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    seed(&ops, &backend, "deployments", deployment("a")).await;
    seed(&ops, &backend, "deployments", deployment("b")).await;

    let body = "spec:\n  replicas: 4\n";
    let a = ops.patch("deployments", Some("default"), "a", body, "").await.unwrap();
    let b = ops.patch("deployments", Some("default"), "b", body, "strategic").await.unwrap();
    assert_eq!(a.as_value()["spec"]["replicas"], b.as_value()["spec"]["replicas"]);
    assert_eq!(a.as_value()["spec"]["replicas"], 4);
}

#[tokio::test]
async fn invalid_patch_type_is_rejected_before_any_call() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    let err = ops.patch("deployments", Some("default"), "web", "spec: {}", "Merge").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().starts_with("validation: patch deployments/web: invalid patch type"), "{}", err);
    let err = ops.patch("deployments", Some("default"), "web", "- a\n- b\n", "merge").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().starts_with("validation: patch deployments/web: "), "{}", err);
    assert!(backend.calls().await.is_empty());
}

#[tokio::test]
async fn cluster_scoped_kind_ignores_namespace() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    seed(&ops, &backend, "nodes", json!({"apiVersion": "v1", "kind": "Node", "metadata": {"name": "n1"}})).await;

    let node = ops.get("nodes", Some("default"), "n1").await.unwrap();
    assert_eq!(node.name(), Some("n1"));
    let nodes = ops.list("no", Some("kube-system"), None).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert!(backend.calls().await.iter().all(|c| c.namespace.is_none()));
}

#[tokio::test]
async fn namespaced_single_object_verbs_need_namespace() {
    let backend = Arc::new(MemoryBackend::new());
    let ops = engine(backend.clone());
    let err = ops.get("pods", None, "web-0").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(
        err.to_string(),
        "validation: get pods/web-0: namespace is required for namespaced resource pods"
    );
    let err = ops.delete("pods", Some("  "), "web-0").await.unwrap_err();
    assert!(err.to_string().starts_with("validation: delete pods/web-0: "), "{}", err);
    assert!(matches!(ops.get("pods", Some("default"), "").await, Err(Error::Validation(_))));
    assert!(backend.calls().await.is_empty());
}

#[tokio::test]
async fn unknown_identifier_suggests() {
    let ops = engine(Arc::new(MemoryBackend::new()));
    match ops.list("deploymnets", None, None).await {
        Err(Error::ResourceKindNotFound { identifier, .. }) => assert_eq!(identifier, "deploymnets"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn access_review_and_logs() {
    let backend = Arc::new(MemoryBackend::new().with_default_namespace("apps"));
    let ops = engine(backend.clone());
    backend
        .set_access("delete", "nodes", AccessDecision { allowed: false, reason: Some("no RBAC policy matched".into()) })
        .await;
    let review = AccessReview { verb: "delete".into(), resource: "nodes".into(), ..Default::default() };
    assert_eq!(ops.can_i(&review).await.unwrap().to_string(), "no (reason: no RBAC policy matched)");
    assert!(ops.can_i(&AccessReview::default()).await.is_err());

    backend.set_pod_logs("apps", "web-0", "a\nb\n").await;
    let text = ops.pod_logs(None, "web-0", &Default::default()).await.unwrap();
    assert_eq!(text, "a\nb\n");
}
