//! MCP over stdio through rmcp.
//!
//! rmcp runs every request as its own task, so a slow tool call never holds up `ping` or
//! other calls. A client `notifications/cancelled` fires the request's cancellation token,
//! which `Toolbox::call` watches.

use anyhow::Context;
use rmcp::model::*;
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler, ServiceExt};
use serde_json::Value as Json;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::{ToolError, Toolbox};

#[derive(Clone)]
pub struct McpServer {
    toolbox: Toolbox,
}

impl McpServer {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }

    pub fn toolbox(&self) -> &Toolbox {
        &self.toolbox
    }

    pub fn server_info() -> Implementation {
        Implementation {
            name: "kube-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Implementation::from_build_env()
        }
    }

    fn instructions(&self) -> String {
        let mut s = String::from(
            "Kubernetes access through the current kubeconfig context. Use kube_api_resources to \
             discover resource types and kube_get_resources to inspect objects before changing them.",
        );
        if self.toolbox.has_playbooks() {
            s.push_str(
                " When troubleshooting, call udt_get_list first to find a playbook whose keywords match \
                 the problem, then udt_get_playbook to read it and follow its steps.",
            );
        }
        s
    }

    /// Serve one MCP session over a byte stream pair until the client goes away.
    pub async fn serve_io<R, W>(self, reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let tools = self.toolbox.tools().len();
        let running = ServiceExt::serve(self, (reader, writer)).await.context("MCP initialize handshake")?;
        info!(tools, "mcp: session initialized");
        let reason = running.waiting().await.context("MCP session task")?;
        info!(reason = ?reason, "mcp: session closed");
        Ok(())
    }

    pub async fn serve_stdio(self) -> anyhow::Result<()> {
        info!("mcp: serving on stdio");
        self.serve_io(tokio::io::stdin(), tokio::io::stdout()).await
    }
}

/// Tool failures are results the model can read; protocol misuse is a JSON-RPC error.
fn tool_result(res: Result<String, ToolError>) -> Result<CallToolResult, McpError> {
    match res {
        Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
        Err(e) if e.is_protocol() => Err(McpError::invalid_params(e.to_string(), None)),
        Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Self::server_info(),
            instructions: Some(self.instructions()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.toolbox.tools().to_vec()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        debug!(tool = %request.name, "mcp: tools/call");
        let arguments = request.arguments.map(Json::Object).unwrap_or(Json::Null);
        tool_result(self.toolbox.call(&request.name, arguments, &context.ct).await)
    }
}
