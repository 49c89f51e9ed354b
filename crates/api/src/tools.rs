//! Tool catalog: argument types, JSON schemas and the descriptions agents read.

use std::sync::Arc;

use rmcp::model::{JsonObject, Tool};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

pub const GET_RESOURCES: &str = "kube_get_resources";
pub const API_RESOURCES: &str = "kube_api_resources";
pub const CAN_I: &str = "kube_can_i";
pub const GET_POD_LOGS: &str = "kube_get_pod_logs";
pub const APPLY_RESOURCE: &str = "kube_apply_resource";
pub const DELETE_RESOURCE: &str = "kube_delete_resource";
pub const PATCH_RESOURCE: &str = "kube_patch_resource";
pub const UDT_GET_LIST: &str = "udt_get_list";
pub const UDT_GET_PLAYBOOK: &str = "udt_get_playbook";

/// Tools that change cluster state; hidden in read-only mode.
pub const MUTATING: [&str; 3] = [APPLY_RESOURCE, DELETE_RESOURCE, PATCH_RESOURCE];

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GetResourcesArgs {
    /// Resource type: plural, singular, kind or short name (e.g. `pods`, `deploy`).
    pub resource: String,
    /// Name of a single object; omit to list.
    #[serde(default)]
    pub name: Option<String>,
    /// Namespace; omit to list across all namespaces. Ignored for cluster-scoped types.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Label selector, e.g. `app=web,tier!=db`.
    #[serde(default, rename = "labelSelector")]
    pub label_selector: Option<String>,
    /// Comma-separated `HEADER:PATH` pairs, e.g. `NAME:.metadata.name`.
    #[serde(default, rename = "custom-columns")]
    pub custom_columns: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ApiResourcesArgs {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CanIArgs {
    /// get, list, watch, create, update, patch, delete, ...
    pub verb: String,
    /// Plural resource name.
    pub resource: String,
    #[serde(default)]
    pub subresource: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    /// API group; empty for the core group.
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GetPodLogsArgs {
    pub name: String,
    /// Defaults to the current context's namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Required when the pod runs more than one container.
    #[serde(default)]
    pub container: Option<String>,
    /// Logs of the previous, terminated instance.
    #[serde(default)]
    pub previous: bool,
    #[serde(default)]
    pub tail_lines: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ApplyResourceArgs {
    /// YAML manifest; several documents may be separated by `---` lines.
    pub manifest: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DeleteResourceArgs {
    pub resource: String,
    pub name: String,
    /// Required for namespaced types.
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PatchResourceArgs {
    pub resource: String,
    pub name: String,
    /// Required for namespaced types.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Patch body as YAML (or JSON).
    pub patch: String,
    /// `strategic` (default), `merge` or `json`.
    #[serde(default, rename = "patchType")]
    pub patch_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct UdtGetListArgs {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct UdtGetPlaybookArgs {
    /// Playbook name as returned by udt_get_list.
    pub name: String,
}

const GET_RESOURCES_DESC: &str = "\
Get one Kubernetes object or list objects of a type, like `kubectl get`.

Arguments:
- `resource`: type name; plural (`pods`), singular (`pod`), kind (`Pod`) or short name (`po`). Custom resources work too.
- `name` (optional): fetch a single object; without it all matching objects are listed.
- `namespace` (optional): for namespaced types, restricts the listing; when omitted a listing spans all namespaces. Fetching a single namespaced object needs it. Cluster-scoped types (nodes, namespaces) ignore it.
- `labelSelector` (optional): e.g. `app=web`.
- `custom-columns` (optional): comma-separated `HEADER:PATH` pairs, e.g. `NAME:.metadata.name,IMAGE:.spec.containers[0].image`. Paths are dotted fields with `[n]` indices; missing values show `<none>`.

Output: every object as a YAML document, documents separated by `---`; or a tab-separated table when `custom-columns` is set.";

const API_RESOURCES_DESC: &str = "\
List the resource types the cluster serves, like `kubectl api-resources`, including custom resources.

Output: a tab-separated table with NAME, SHORTNAMES, APIVERSION, NAMESPACED and KIND columns.";

const CAN_I_DESC: &str = "\
Check whether the current identity may perform an action, like `kubectl auth can-i`.

Arguments: `verb` (get, list, create, delete, ...), `resource` (plural), and optionally `subresource` (e.g. `log`), `name`, `namespace` and `group`.

Output: `yes`, or `no` with the authorizer's reason when it gives one.";

const GET_POD_LOGS_DESC: &str = "\
Fetch the logs of a pod, like `kubectl logs`.

Arguments: `name`, `namespace` (defaults to the current context's), `container` (needed for multi-container pods), `previous` (logs of the previous instance) and `tail_lines`.

Output: the raw log text.";

const APPLY_RESOURCE_DESC: &str = "\
Create or update objects from a YAML manifest with server-side apply, like `kubectl apply -f`.

`manifest` holds one or more complete objects (apiVersion, kind, metadata.name, spec or data), separated by `---` lines. Namespaced objects without metadata.namespace land in the current context's namespace. Documents are applied in order; the first failure stops the call and names the failing document, earlier documents stay applied. Conflicting field ownership is overridden.

Output: the applied objects as YAML documents, including server-populated fields.";

const DELETE_RESOURCE_DESC: &str = "\
Delete one object, like `kubectl delete`. Deletion is graceful and cannot be undone; the call returns once the server accepted it.

Arguments: `resource`, `name`, and `namespace` for namespaced types.

Output: `Resource <type>/<name> deleted.`";

const PATCH_RESOURCE_DESC: &str = "\
Partially update one object, like `kubectl patch`.

Arguments: `resource`, `name`, `namespace` for namespaced types, `patch` (YAML) and `patchType`:
- `strategic` (default): Kubernetes strategic merge; lists merge by their schema keys.
- `merge`: JSON merge patch; maps merge, lists are replaced.
- `json`: JSON patch, a list of operations such as `[{\"op\":\"replace\",\"path\":\"/spec/replicas\",\"value\":3}]`.

Output: the patched object as YAML.";

const UDT_GET_LIST_DESC: &str = "\
List the available troubleshooting playbooks with their keywords, title and summary, as JSON. Pick a playbook whose keywords match the problem at hand.";

const UDT_GET_PLAYBOOK_DESC: &str = "\
Return the content of a troubleshooting playbook by name. Follow its steps while investigating the issue.";

fn schema<T: JsonSchema>() -> JsonObject {
    match serde_json::to_value(schemars::schema_for!(T)) {
        Ok(Json::Object(map)) => map,
        _ => {
            let mut map = JsonObject::new();
            map.insert("type".to_string(), json!("object"));
            map
        }
    }
}

fn spec<T: JsonSchema>(name: &'static str, description: &'static str) -> Tool {
    Tool::new(name, description, Arc::new(schema::<T>()))
}

/// Tools to advertise for the given server mode, in registration order.
pub fn catalog(read_only: bool, playbooks: bool) -> Vec<Tool> {
    let mut tools = vec![
        spec::<GetResourcesArgs>(GET_RESOURCES, GET_RESOURCES_DESC),
        spec::<ApiResourcesArgs>(API_RESOURCES, API_RESOURCES_DESC),
        spec::<GetPodLogsArgs>(GET_POD_LOGS, GET_POD_LOGS_DESC),
        spec::<CanIArgs>(CAN_I, CAN_I_DESC),
    ];
    if !read_only {
        tools.push(spec::<ApplyResourceArgs>(APPLY_RESOURCE, APPLY_RESOURCE_DESC));
        tools.push(spec::<DeleteResourceArgs>(DELETE_RESOURCE, DELETE_RESOURCE_DESC));
        tools.push(spec::<PatchResourceArgs>(PATCH_RESOURCE, PATCH_RESOURCE_DESC));
    }
    if playbooks {
        tools.push(spec::<UdtGetListArgs>(UDT_GET_LIST, UDT_GET_LIST_DESC));
        tools.push(spec::<UdtGetPlaybookArgs>(UDT_GET_PLAYBOOK, UDT_GET_PLAYBOOK_DESC));
    }
    tools
}
