//! kube-mcp apply: manifest splitting, per-document validation and patch-body preparation.
//!
//! Everything here runs before a request leaves the process; a document or patch that fails
//! these checks never reaches the API server.

#![forbid(unsafe_code)]

use kmcp_core::convert::yaml_to_value;
use kmcp_core::{Error, GroupVersionKind, PatchKind, ResourceObject, Result};
use kube::api::Patch;
use metrics::counter;
use serde_json::Value as Json;
use tracing::debug;

fn max_yaml_bytes() -> usize {
    std::env::var("KMCP_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1024 * 1024)
}

fn max_yaml_nodes() -> usize {
    std::env::var("KMCP_MAX_YAML_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

fn json_node_budget_exceeded(v: &Json, max: usize) -> bool {
    // bail as soon as the running count reaches max
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max {
            return;
        }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur >= max {
                        break;
                    }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr {
                    if *cur >= max {
                        break;
                    }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

fn check_size(kind: &str, text: &str) -> Result<()> {
    let max = max_yaml_bytes();
    if text.len() > max {
        return Err(Error::Validation(format!("{} too large (>{} bytes)", kind, max)));
    }
    Ok(())
}

fn check_nodes(kind: &str, v: &Json) -> Result<()> {
    let max = max_yaml_nodes();
    if json_node_budget_exceeded(v, max) {
        return Err(Error::Validation(format!("{} too complex (>{} nodes)", kind, max)));
    }
    Ok(())
}

fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    line == "---" || line.starts_with("--- ")
}

fn is_blank(doc: &str) -> bool {
    doc.lines().all(|l| {
        let t = l.trim();
        t.is_empty() || t.starts_with('#')
    })
}

/// Split a multi-document manifest on bare `---` lines, dropping blank documents.
///
/// Only a line consisting of `---` (optionally followed by a space and a comment) separates
/// documents; `---` inside a value or a block scalar line with other text does not.
pub fn split_manifest(manifest: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut cur = String::new();
    for line in manifest.lines() {
        if is_separator(line) {
            if !is_blank(&cur) {
                docs.push(std::mem::take(&mut cur));
            }
            cur.clear();
            continue;
        }
        cur.push_str(line);
        cur.push('\n');
    }
    if !is_blank(&cur) {
        docs.push(cur);
    }
    docs
}

/// A locally validated manifest document.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestDocument {
    pub object: ResourceObject,
    pub gvk: GroupVersionKind,
    pub name: String,
}

/// Parse and validate one document: budgets, envelope fields, selector/label consistency.
pub fn parse_document(yaml: &str) -> Result<ManifestDocument> {
    let res = parse_document_inner(yaml);
    if let Err(e) = &res {
        counter!("kmcp_manifest_rejected_total", 1u64);
        debug!(error = %e, "manifest document rejected");
    }
    res
}

fn parse_document_inner(yaml: &str) -> Result<ManifestDocument> {
    check_size("manifest document", yaml)?;
    let json = yaml_to_value(yaml)?;
    check_nodes("manifest document", &json)?;
    if json.is_null() {
        return Err(Error::Validation("manifest document is empty".into()));
    }
    let object = ResourceObject::try_from(json)?;
    let api_version = object
        .api_version()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation("manifest missing apiVersion".into()))?;
    let kind = object
        .kind()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation("manifest missing kind".into()))?;
    let name = object
        .name()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation(format!("{} manifest missing metadata.name", kind)))?
        .to_string();
    let gvk = GroupVersionKind::from_api_version(api_version, kind);
    check_selector(&object, &gvk, &name)?;
    Ok(ManifestDocument { object, gvk, name })
}

/// Workload kinds whose `spec.selector` must select the pod template.
fn selects_template(gvk: &GroupVersionKind) -> bool {
    match gvk.group.as_str() {
        "apps" => matches!(gvk.kind.as_str(), "Deployment" | "ReplicaSet" | "StatefulSet" | "DaemonSet"),
        "" => gvk.kind == "ReplicationController",
        _ => false,
    }
}

fn check_selector(object: &ResourceObject, gvk: &GroupVersionKind, name: &str) -> Result<()> {
    if !selects_template(gvk) {
        return Ok(());
    }
    let v = object.as_value();
    let selector = if gvk.group.is_empty() {
        v.pointer("/spec/selector")
    } else {
        v.pointer("/spec/selector/matchLabels")
    };
    let Some(selector) = selector.and_then(|s| s.as_object()) else {
        return Ok(());
    };
    let Some(template) = v.pointer("/spec/template") else {
        return Ok(());
    };
    let labels = template.pointer("/metadata/labels").and_then(|l| l.as_object());
    for (key, want) in selector {
        let have = labels.and_then(|l| l.get(key));
        if have != Some(want) {
            return Err(Error::Validation(format!(
                "{} {:?}: selector {}={} does not match template labels",
                gvk.kind,
                name,
                key,
                want.as_str().map(str::to_string).unwrap_or_else(|| want.to_string())
            )));
        }
    }
    Ok(())
}

/// Turn a YAML (or JSON) patch body into the request body for `kind`.
///
/// Strategic and merge patches must be mappings; a JSON patch must be a sequence of
/// RFC 6902 operations.
pub fn prepare_patch(kind: PatchKind, body: &str) -> Result<Patch<Json>> {
    check_size("patch", body)?;
    let value = yaml_to_value(body)?;
    check_nodes("patch", &value)?;
    match kind {
        PatchKind::Strategic | PatchKind::Merge => {
            if !value.is_object() {
                return Err(Error::Validation(format!(
                    "{} patch must be a mapping, got {}",
                    kind,
                    type_name(&value)
                )));
            }
            Ok(match kind {
                PatchKind::Merge => Patch::Merge(value),
                _ => Patch::Strategic(value),
            })
        }
        PatchKind::Json => {
            if !value.is_array() {
                return Err(Error::Validation(format!(
                    "json patch must be a sequence of operations, got {}",
                    type_name(&value)
                )));
            }
            let ops: json_patch::Patch = serde_json::from_value(value)
                .map_err(|e| Error::Validation(format!("invalid json patch: {}", e)))?;
            Ok(Patch::Json(ops))
        }
    }
}

fn type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "an empty document",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "a sequence",
        Json::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_skips_blank_documents() {
        let m = "---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\n\n# just a comment\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n--- # trailing\n";
        let docs = split_manifest(m);
        assert_eq!(docs.len(), 2);
        assert!(docs[0].contains("name: a"));
        assert!(docs[1].contains("name: b"));
    }

    #[test]
    fn size_budget_defaults_to_one_mebibyte() {
        assert_eq!(max_yaml_bytes(), 1 << 20);
        assert!(check_size("manifest", &"x".repeat(1 << 20)).is_ok());
        let err = check_size("manifest", &"x".repeat((1 << 20) + 1)).unwrap_err();
        assert_eq!(err.to_string(), "validation: manifest too large (>1048576 bytes)");
    }

    #[test]
    fn separator_must_be_a_bare_line() {
        let m = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\ndata:\n  banner: \"---\"\n  text: |\n    a---b\n";
        assert_eq!(split_manifest(m).len(), 1);
        assert!(split_manifest("").is_empty());
        assert!(split_manifest("---\n---\n").is_empty());
    }

    #[test]
    fn parse_errors_are_friendly() {
        let e1 = parse_document("kind: Foo\nmetadata:\n  name: x\n").unwrap_err().to_string();
        assert!(e1.contains("missing apiVersion"), "e1={}", e1);

        let e2 = parse_document("apiVersion: v1\nmetadata:\n  name: x\n").unwrap_err().to_string();
        assert!(e2.contains("missing kind"), "e2={}", e2);

        let e3 = parse_document("apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n").unwrap_err().to_string();
        assert!(e3.contains("missing metadata.name"), "e3={}", e3);

        let e4 = parse_document("- a\n- b\n").unwrap_err().to_string();
        assert!(e4.contains("mapping"), "e4={}", e4);

        assert!(matches!(parse_document("key: [unclosed"), Err(Error::Validation(_))));
    }

    #[test]
    fn parsed_document_carries_target() {
        let d = parse_document("apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n  namespace: prod\n").unwrap();
        assert_eq!(d.name, "web");
        assert_eq!(d.gvk.group, "apps");
        assert_eq!(d.object.namespace(), Some("prod"));
    }

    #[test]
    fn selector_must_match_template_labels() {
        let ok = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  selector:\n    matchLabels:\n      app: web\n  template:\n    metadata:\n      labels:\n        app: web\n        tier: fe\n";
        assert!(parse_document(ok).is_ok());

        let bad = ok.replace("        app: web\n", "        app: api\n");
        let err = parse_document(&bad).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("selector app=web"), "{}", err);

        let rc = "apiVersion: v1\nkind: ReplicationController\nmetadata:\n  name: rc\nspec:\n  selector:\n    app: x\n  template:\n    metadata:\n      labels:\n        app: y\n";
        assert!(parse_document(rc).is_err());

        // other kinds are not checked
        let svc = "apiVersion: v1\nkind: Service\nmetadata:\n  name: s\nspec:\n  selector:\n    app: x\n";
        assert!(parse_document(svc).is_ok());
    }

    #[test]
    fn node_budget() {
        let v = json!({"a": [1, 2, 3], "b": {"c": 1}});
        assert!(!json_node_budget_exceeded(&v, 100));
        assert!(json_node_budget_exceeded(&v, 4));
    }

    #[test]
    fn patch_bodies_per_kind() {
        match prepare_patch(PatchKind::Strategic, "spec:\n  replicas: 3\n").unwrap() {
            Patch::Strategic(v) => assert_eq!(v, json!({"spec": {"replicas": 3}})),
            other => panic!("unexpected patch {:?}", other),
        }
        match prepare_patch(PatchKind::Merge, r#"{"metadata":{"labels":{"a":null}}}"#).unwrap() {
            Patch::Merge(v) => assert_eq!(v, json!({"metadata": {"labels": {"a": null}}})),
            other => panic!("unexpected patch {:?}", other),
        }

        let p = prepare_patch(PatchKind::Json, r#"[{"op":"replace","path":"/spec/replicas","value":3}]"#).unwrap();
        match p {
            Patch::Json(ops) => assert_eq!(ops.0.len(), 1),
            other => panic!("unexpected patch {:?}", other),
        }
    }

    #[test]
    fn patch_shape_mismatches_are_rejected() {
        assert!(prepare_patch(PatchKind::Strategic, "- a\n").is_err());
        assert!(prepare_patch(PatchKind::Merge, "").is_err());
        assert!(prepare_patch(PatchKind::Json, "spec: {replicas: 3}").is_err());
        let err = prepare_patch(PatchKind::Json, r#"[{"op":"frobnicate","path":"/x"}]"#).unwrap_err();
        assert!(err.to_string().contains("invalid json patch"), "{}", err);
    }
}
