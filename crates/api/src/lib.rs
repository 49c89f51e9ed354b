//! kube-mcp API: the tool surface agents call.
//!
//! `Toolbox` turns a tool name plus JSON arguments into text by way of the ops engine and
//! the renderers; `McpServer` exposes it as an rmcp server handler over stdio.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use kmcp_core::columns::render_yaml;
use kmcp_kubehub::render_api_resources;
use kmcp_ops::{AccessReview, GetRequest, KubeOps, LogOptions};
use kmcp_playbooks::Playbooks;
use metrics::{counter, histogram};
use rmcp::model::Tool;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod server;
pub mod tools;

pub use server::McpServer;
pub use tools::catalog;

use tools::*;

/// Why a tool call produced no result text.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool {0:?}")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error(transparent)]
    Kube(#[from] kmcp_core::Error),
    #[error("{0:#}")]
    Playbook(anyhow::Error),
}

impl ToolError {
    /// Protocol-level problems are JSON-RPC errors; everything else is a tool result.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ToolError::UnknownTool(_) | ToolError::InvalidArguments { .. })
    }

    fn class(&self) -> &'static str {
        match self {
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::InvalidArguments { .. } => "invalid_arguments",
            ToolError::Kube(e) => e.class(),
            ToolError::Playbook(_) => "playbook",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolboxConfig {
    pub read_only: bool,
    /// Deadline for a single tool call.
    pub timeout: Duration,
}

impl Default for ToolboxConfig {
    fn default() -> Self {
        Self { read_only: false, timeout: Duration::from_secs(30) }
    }
}

#[derive(Clone)]
pub struct Toolbox {
    ops: KubeOps,
    playbooks: Option<Playbooks>,
    config: ToolboxConfig,
    tools: Arc<Vec<Tool>>,
}

fn args<T: DeserializeOwned>(tool: &str, raw: Json) -> Result<T, ToolError> {
    let raw = if raw.is_null() { Json::Object(Default::default()) } else { raw };
    serde_json::from_value(raw)
        .map_err(|e| ToolError::InvalidArguments { tool: tool.to_string(), message: e.to_string() })
}

impl Toolbox {
    pub fn new(ops: KubeOps, playbooks: Option<Playbooks>, config: ToolboxConfig) -> Self {
        let tools = Arc::new(catalog(config.read_only, playbooks.is_some()));
        Self { ops, playbooks, config, tools }
    }

    pub fn ops(&self) -> &KubeOps {
        &self.ops
    }

    pub fn has_playbooks(&self) -> bool {
        self.playbooks.is_some()
    }

    /// Tools registered for this mode; built once.
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    fn is_registered(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// Run one tool under the configured deadline until it finishes or `cancel` fires.
    pub async fn call(&self, name: &str, arguments: Json, cancel: &CancellationToken) -> Result<String, ToolError> {
        let t0 = Instant::now();
        counter!("kmcp_tool_calls_total", 1u64, "tool" => name.to_string());
        let cancelled = |after: Duration| {
            ToolError::Kube(kmcp_core::Error::Cancelled {
                operation: name.to_string(),
                after_ms: after.as_millis() as u64,
            })
        };
        let res = tokio::select! {
            res = tokio::time::timeout(self.config.timeout, self.dispatch(name, arguments)) => match res {
                Ok(res) => res,
                Err(_) => Err(cancelled(self.config.timeout)),
            },
            _ = cancel.cancelled() => Err(cancelled(t0.elapsed())),
        };
        let took_ms = t0.elapsed().as_millis() as u64;
        histogram!("kmcp_tool_latency_ms", took_ms as f64);
        match &res {
            Ok(text) => info!(tool = name, bytes = text.len(), took_ms, "api: tool ok"),
            Err(e) => {
                counter!("kmcp_tool_errors_total", 1u64, "tool" => name.to_string());
                warn!(tool = name, class = e.class(), error = %e, took_ms, "api: tool failed");
            }
        }
        res
    }

    async fn dispatch(&self, name: &str, raw: Json) -> Result<String, ToolError> {
        if !self.is_registered(name) {
            return Err(ToolError::UnknownTool(name.to_string()));
        }
        match name {
            GET_RESOURCES => {
                let a: GetResourcesArgs = args(name, raw)?;
                let req = GetRequest {
                    resource: a.resource,
                    name: a.name,
                    namespace: a.namespace,
                    label_selector: a.label_selector,
                };
                let objects = self.ops.fetch(&req).await?;
                Ok(self.ops.render(&objects, a.custom_columns.as_deref())?)
            }
            API_RESOURCES => {
                let _: ApiResourcesArgs = args(name, raw)?;
                Ok(render_api_resources(&self.ops.api_resources().await?))
            }
            CAN_I => {
                let a: CanIArgs = args(name, raw)?;
                let review = AccessReview {
                    verb: a.verb,
                    resource: a.resource,
                    subresource: a.subresource.filter(|s| !s.is_empty()),
                    name: a.name.filter(|s| !s.is_empty()),
                    namespace: a.namespace.filter(|s| !s.is_empty()),
                    group: a.group.filter(|s| !s.is_empty()),
                };
                Ok(self.ops.can_i(&review).await?.to_string())
            }
            GET_POD_LOGS => {
                let a: GetPodLogsArgs = args(name, raw)?;
                let opts = LogOptions {
                    container: a.container.filter(|s| !s.is_empty()),
                    previous: a.previous,
                    tail_lines: a.tail_lines,
                };
                Ok(self.ops.pod_logs(a.namespace.as_deref(), &a.name, &opts).await?)
            }
            APPLY_RESOURCE => {
                let a: ApplyResourceArgs = args(name, raw)?;
                let applied = self.ops.apply(&a.manifest).await?;
                Ok(render_yaml(&applied)?)
            }
            DELETE_RESOURCE => {
                let a: DeleteResourceArgs = args(name, raw)?;
                Ok(self.ops.delete(&a.resource, a.namespace.as_deref(), &a.name).await?)
            }
            PATCH_RESOURCE => {
                let a: PatchResourceArgs = args(name, raw)?;
                let obj = self
                    .ops
                    .patch(&a.resource, a.namespace.as_deref(), &a.name, &a.patch, a.patch_type.as_deref().unwrap_or(""))
                    .await?;
                Ok(render_yaml(std::slice::from_ref(&obj))?)
            }
            UDT_GET_LIST => {
                let _: UdtGetListArgs = args(name, raw)?;
                let pb = self.playbooks()?;
                pb.list_json().map_err(ToolError::Playbook)
            }
            UDT_GET_PLAYBOOK => {
                let a: UdtGetPlaybookArgs = args(name, raw)?;
                self.playbooks()?.get(&a.name).map_err(ToolError::Playbook)
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    fn playbooks(&self) -> Result<&Playbooks, ToolError> {
        self.playbooks.as_ref().ok_or_else(|| ToolError::UnknownTool(UDT_GET_LIST.to_string()))
    }
}
