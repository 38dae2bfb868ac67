//! Tool hub IPC server - main entry point.
//!
//! Loads the configuration and tool catalog, then serves `tools`, `groups`
//! and `hub` requests over TCP+msgpack until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tool_hub::ipc::IpcServer;
use tool_hub::tools::{InMemoryInvocationLog, ToolCatalog};
use tool_hub::{Config, ToolHub};

#[derive(Debug, Parser)]
#[command(name = "tool-hub", version, about = "Admission-gated tool invocation server")]
struct Args {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(long, env = "TOOL_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// JSON tool catalog with `groups`, `command_tools` and `tools`.
    #[arg(long, env = "TOOL_HUB_CATALOG")]
    catalog: Option<PathBuf>,

    /// Bind address; overrides `server.listen_addr`.
    #[arg(long, env = "TOOL_HUB_LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    tool_hub::observability::init_tracing(&config.observability);

    let catalog = match &args.catalog {
        Some(path) => ToolCatalog::from_file(path)?,
        None => ToolCatalog::new(),
    };
    tracing::info!(tools = catalog.len(), "tool catalog loaded");

    let hub = Arc::new(ToolHub::new(
        Arc::new(catalog),
        Arc::new(InMemoryInvocationLog::new()),
        config.invocation.clone(),
    ));

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let server = IpcServer::new(hub, addr, config.ipc.clone());

    let shutdown = server.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    tracing::info!("tool hub starting on {}", addr);
    server.serve().await?;
    Ok(())
}
