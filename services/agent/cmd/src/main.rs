//! Mesh agent binary.
//!
//! Loads one mesh membership, joins its hubs, optionally serves the local
//! control API and leaves the mesh on SIGINT or SIGTERM.

use clap::Parser;
use mesh_agent::{Agent, AgentOptions, ApiServer, MeshConfig};
use mesh_hub::HubConfig;
use mesh_storage::StorageMode;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[macro_use]
mod logging;

use logging::AgentLogFormatter;

/// Service mesh agent
#[derive(Parser, Debug)]
#[command(name = "mesh-agent", version, about = "Service mesh agent")]
struct Args {
    /// Mesh membership file (YAML)
    #[arg(long, default_value = "mesh.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Local control API bind address, e.g. 127.0.0.1:8080
    #[arg(long)]
    api: Option<SocketAddr>,

    /// Storage mode: memory, file
    #[arg(long, default_value = "memory")]
    storage_mode: String,

    /// Data directory for file storage
    #[arg(long, default_value = "./meshdata")]
    storage_data_dir: PathBuf,

    /// Status report interval, e.g. 15s
    #[arg(long, default_value = "15s")]
    heartbeat_interval: humantime::Duration,

    /// Service list push and reverse tunnel retry interval, e.g. 5s
    #[arg(long, default_value = "5s")]
    retry_interval: humantime::Duration,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut env_filter = EnvFilter::new("info");
    for target in [
        "mesh_agent",
        "mesh_hub",
        "mesh_proxy",
        "mesh_routing",
        "mesh_session",
        "mesh_storage",
        "mesh_wire",
    ] {
        env_filter = env_filter.add_directive(format!("{}={}", target, args.log_level).parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(AgentLogFormatter::new("mesh-agent".to_string()))
        .init();

    component_info!("main", "Starting mesh agent v{}", env!("CARGO_PKG_VERSION"));

    let config = MeshConfig::load_from_file(&args.config)?;

    let storage_mode = match args.storage_mode.as_str() {
        "memory" => StorageMode::InMemory,
        "file" => StorageMode::File {
            data_dir: args.storage_data_dir.clone(),
        },
        _ => anyhow::bail!(
            "Invalid storage mode: {}. Use 'memory' or 'file'",
            args.storage_mode
        ),
    };
    component_info!("main", "Storage: {:?}", storage_mode);
    let store = mesh_storage::from_mode(storage_mode).await?;

    let retry_interval = Duration::from(args.retry_interval);
    let options = AgentOptions {
        heartbeat_interval: Duration::from(args.heartbeat_interval),
        hub: HubConfig {
            retry_interval,
            tunnel_interval: retry_interval,
        },
    };
    component_info!(
        "main",
        "Timing: heartbeat every {:?}, retries every {:?}",
        options.heartbeat_interval,
        retry_interval
    );

    let agent = Agent::join(config, store, options).await;

    let api_task = match args.api {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to bind control API on {}: {}", addr, e))?;
            let server = Arc::new(ApiServer::new(agent.clone()));
            Some(tokio::spawn(server.serve(listener)))
        }
        None => {
            component_debug!("api", "Control API disabled");
            None
        }
    };

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGINT handler: {}", e))?;

    tokio::select! {
        _ = sigterm.recv() => component_info!("main", "Received SIGTERM, leaving mesh"),
        _ = sigint.recv() => component_info!("main", "Received SIGINT, leaving mesh"),
    }

    if let Some(task) = api_task {
        task.abort();
    }
    agent.leave();

    if !agent.errors().is_empty() {
        component_warn!(
            "main",
            "Left with {} unresolved mesh errors",
            agent.errors().len()
        );
    }
    component_info!("main", "Mesh agent shutdown complete");
    Ok(())
}
