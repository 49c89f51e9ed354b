use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kmcp_api::{McpServer, Toolbox, ToolboxConfig};
use kmcp_core::columns::render_yaml;
use kmcp_kubehub::{get_kube_client, render_api_resources, DiscoveryCache, KubeDiscovery, Resolver};
use kmcp_ops::{GetRequest, KubeBackend, KubeOps, OpsSettings, DEFAULT_FIELD_MANAGER};
use kmcp_playbooks::Playbooks;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kube-mcp", version, about = "MCP server for generic Kubernetes resource access")]
struct Cli {
    /// Do not offer apply, delete or patch
    #[arg(long = "read-only", env = "KMCP_READ_ONLY", global = true)]
    read_only: bool,

    /// Directory of troubleshooting playbooks (*.md)
    #[arg(long = "udt-path", env = "KMCP_UDT_PATH", global = true)]
    udt_path: Option<PathBuf>,

    /// Server-side apply field manager
    #[arg(long = "field-manager", env = "KMCP_FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER, global = true)]
    field_manager: String,

    /// Per-call deadline and API read timeout
    #[arg(long = "timeout-secs", env = "KMCP_TIMEOUT_SECS", default_value_t = 30, global = true)]
    timeout_secs: u64,

    /// Drop metadata.managedFields from output
    #[arg(long = "strip-managed-fields", env = "KMCP_STRIP_MANAGED_FIELDS", global = true)]
    strip_managed_fields: bool,

    /// Namespace for direct commands
    #[arg(short = 'n', long = "namespace", env = "KMCP_NAMESPACE", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve MCP over stdio (default)
    Serve,
    /// Get one object or list objects of a type
    Get {
        /// Resource type, e.g. "pods", "deploy", "Certificate"
        resource: String,
        name: Option<String>,
        /// Label selector
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        /// Custom columns, e.g. "NAME:.metadata.name,IMAGE:.spec.containers[0].image"
        #[arg(long = "columns")]
        columns: Option<String>,
    },
    /// Server-side apply a manifest file ("-" reads stdin)
    Apply {
        #[arg(short = 'f', long = "filename")]
        file: String,
    },
    /// Delete one object
    Delete { resource: String, name: String },
    /// Patch one object
    Patch {
        resource: String,
        name: String,
        /// Patch body (YAML or JSON)
        #[arg(short = 'p', long = "patch")]
        patch: String,
        /// strategic | merge | json
        #[arg(long = "type", default_value = "strategic")]
        patch_type: String,
    },
    /// List served resource types
    ApiResources,
    /// List playbooks, or print one by name
    Playbooks { name: Option<String> },
}

fn init_tracing() {
    let env = std::env::var("KMCP_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KMCP_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KMCP_METRICS_ADDR; expected host:port");
        }
    }
}

impl Cli {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    async fn ops(&self) -> Result<KubeOps> {
        let client = get_kube_client(self.timeout()).await?;
        let cache = Arc::new(DiscoveryCache::new(Arc::new(KubeDiscovery::new(client.clone()))));
        let backend = Arc::new(KubeBackend::new(client));
        let settings = OpsSettings {
            field_manager: self.field_manager.clone(),
            strip_managed_fields: self.strip_managed_fields,
        };
        Ok(KubeOps::new(Resolver::new(cache), backend, settings))
    }

    fn playbooks(&self) -> Result<Option<Playbooks>> {
        match &self.udt_path {
            Some(dir) => Ok(Some(Playbooks::scan(dir).context("scanning playbooks")?)),
            None => Ok(None),
        }
    }
}

fn emit(text: &str) {
    print!("{}", text);
    if !text.is_empty() && !text.ends_with('\n') {
        println!();
    }
}

fn read_manifest(file: &str) -> Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading manifest from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(file).with_context(|| format!("reading manifest {}", file))
}

async fn serve(cli: &Cli) -> Result<()> {
    let ops = cli.ops().await?;
    let playbooks = cli.playbooks()?;
    let config = ToolboxConfig { read_only: cli.read_only, timeout: cli.timeout() };
    info!(
        read_only = config.read_only,
        playbooks = playbooks.is_some(),
        field_manager = %cli.field_manager,
        timeout_s = config.timeout.as_secs(),
        "kube-mcp starting"
    );
    let server = McpServer::new(Toolbox::new(ops, playbooks, config));
    tokio::select! {
        res = server.serve_stdio() => res,
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received; shutting down");
            Ok(())
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let ns = cli.namespace.as_deref();
    match &cli.command {
        None | Some(Commands::Serve) => serve(cli).await,
        Some(Commands::Get { resource, name, selector, columns }) => {
            let ops = cli.ops().await?;
            let req = GetRequest {
                resource: resource.clone(),
                name: name.clone(),
                namespace: cli.namespace.clone(),
                label_selector: selector.clone(),
            };
            let objects = ops.fetch(&req).await?;
            emit(&ops.render(&objects, columns.as_deref())?);
            Ok(())
        }
        Some(Commands::Apply { file }) => {
            if cli.read_only {
                anyhow::bail!("apply is disabled in read-only mode");
            }
            let manifest = read_manifest(file)?;
            let ops = cli.ops().await?;
            let applied = ops.apply(&manifest).await?;
            emit(&render_yaml(&applied)?);
            Ok(())
        }
        Some(Commands::Delete { resource, name }) => {
            if cli.read_only {
                anyhow::bail!("delete is disabled in read-only mode");
            }
            let ops = cli.ops().await?;
            emit(&ops.delete(resource, ns, name).await?);
            Ok(())
        }
        Some(Commands::Patch { resource, name, patch, patch_type }) => {
            if cli.read_only {
                anyhow::bail!("patch is disabled in read-only mode");
            }
            let ops = cli.ops().await?;
            let obj = ops.patch(resource, ns, name, patch, patch_type).await?;
            emit(&render_yaml(std::slice::from_ref(&obj))?);
            Ok(())
        }
        Some(Commands::ApiResources) => {
            let ops = cli.ops().await?;
            emit(&render_api_resources(&ops.api_resources().await?));
            Ok(())
        }
        Some(Commands::Playbooks { name }) => {
            let Some(pb) = cli.playbooks()? else {
                anyhow::bail!("no playbook directory; set --udt-path or KMCP_UDT_PATH");
            };
            match name {
                Some(n) => emit(&pb.get(n)?),
                None => {
                    for p in pb.list() {
                        println!("{}\t{}\t{}", p.name, p.keywords.join("; "), p.title);
                    }
                }
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let started = Instant::now();
    let res = run(&cli).await;
    if let Err(e) = &res {
        error!(error = %e, took_ms = started.elapsed().as_millis(), "command failed");
    }
    res
}
