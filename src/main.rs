//! Geoproxy - short-lived VPN-tunnelled HTTP proxy instances
//!
//! Runs the catalog, orchestrator and HTTP API against either a local
//! Docker engine or the Kubernetes cluster the process lives in.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use geoproxy_api::{ApiServer, ApiServerConfig};
use geoproxy_backend::{BackendExecutor, VpnTunnelConfig};
use geoproxy_backend_docker::{DockerExecutor, DockerExecutorConfig};
use geoproxy_backend_k8s::{InClusterConfig, K8sExecutor, K8sExecutorConfig};
use geoproxy_catalog::{CatalogConfig, ServerCatalog};
use geoproxy_control::{Orchestrator, OrchestratorConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// Local Docker engine, one container per instance
    Docker,
    /// In-cluster Kubernetes, one pod per instance
    Kubernetes,
}

/// Geoproxy - provision geo-located HTTP proxies over VPN tunnels
#[derive(Parser, Debug)]
#[command(name = "geoproxy")]
#[command(about = "Provision geo-located HTTP proxy instances over VPN tunnels")]
#[command(version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
))]
struct Cli {
    /// Backend that runs the proxy units
    #[arg(long, value_enum, env = "BACKEND", default_value = "docker")]
    backend: Backend,

    /// Address to bind the HTTP API
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:5000")]
    bind_addr: SocketAddr,

    /// Maximum concurrently provisioned instances
    #[arg(long, env = "INSTANCE_LIMIT", default_value = "2")]
    instance_limit: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// WireGuard private key for the VPN provider account
    #[arg(long, env = "WIREGUARD_PRIVATE_KEY", hide_env_values = true)]
    wireguard_private_key: String,

    /// WireGuard interface addresses assigned by the provider
    #[arg(long, env = "WIREGUARD_ADDRESSES")]
    wireguard_addresses: String,

    /// VPN service provider tag understood by the gateway image
    #[arg(long, env = "VPN_SERVICE_PROVIDER", default_value = "mullvad")]
    vpn_provider: String,

    /// Extra inbound ports to allow through the unit firewall
    #[arg(long, env = "FIREWALL_INPUT_PORTS")]
    firewall_input_ports: Option<String>,

    /// VPN gateway image units are created from
    #[arg(long, env = "GLUETUN_IMAGE", default_value = "qmcgaw/gluetun:latest")]
    image: String,

    /// Port the HTTP proxy listens on inside each unit
    #[arg(long, env = "PROXY_PORT", default_value = "8888")]
    proxy_port: u16,

    /// Inline server-list payload (highest priority catalog source)
    #[arg(long, env = "SERVERS_JSON", hide_env_values = true)]
    servers_json: Option<String>,

    /// Path to a server-list payload file
    #[arg(long, env = "SERVERS_FILE_PATH")]
    servers_file: Option<PathBuf>,

    /// Seconds to wait for a fresh unit to become ready
    #[arg(long, env = "READY_TIMEOUT", default_value = "90")]
    ready_timeout: u64,

    /// Seconds to wait for a live server-list fetch
    #[arg(long, env = "FETCH_TIMEOUT", default_value = "90")]
    fetch_timeout: u64,

    /// Docker engine socket (docker backend)
    #[arg(long, env = "DOCKER_SOCKET", default_value = "/var/run/docker.sock")]
    docker_socket: PathBuf,

    /// Docker network to attach units to (docker backend)
    #[arg(long, env = "DOCKER_NETWORK")]
    docker_network: Option<String>,

    /// Namespace units are created in (kubernetes backend)
    #[arg(long, env = "K8S_NAMESPACE", default_value = "default")]
    namespace: String,
}

fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

async fn build_executor(cli: &Cli, tunnel: VpnTunnelConfig) -> Result<Arc<dyn BackendExecutor>> {
    let ready_timeout = Duration::from_secs(cli.ready_timeout);
    match cli.backend {
        Backend::Docker => {
            let mut config = DockerExecutorConfig::new(tunnel);
            config.socket_path = cli.docker_socket.clone();
            config.image = cli.image.clone();
            config.network = cli.docker_network.clone();
            config.ready_timeout = ready_timeout;
            info!("Backend: docker via {}", config.socket_path.display());
            Ok(Arc::new(DockerExecutor::new(config)))
        }
        Backend::Kubernetes => {
            let cluster = InClusterConfig::load()
                .await
                .context("Failed to load in-cluster credentials")?;
            let mut config = K8sExecutorConfig::new(cli.namespace.clone(), tunnel);
            config.image = cli.image.clone();
            config.ready_timeout = ready_timeout;
            info!("Backend: kubernetes, namespace {}", config.namespace);
            Ok(Arc::new(
                K8sExecutor::new(&cluster, config).context("Failed to build cluster client")?,
            ))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    info!(
        "Geoproxy {} ({}) starting...",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    // Units on the cluster backend need the proxy port open through the
    // gateway firewall so the readiness probe can reach it
    let firewall_input_ports = match (&cli.backend, cli.firewall_input_ports.clone()) {
        (_, Some(ports)) => Some(ports),
        (Backend::Kubernetes, None) => Some(cli.proxy_port.to_string()),
        (Backend::Docker, None) => None,
    };

    let tunnel = VpnTunnelConfig {
        provider: cli.vpn_provider.clone(),
        wireguard_private_key: cli.wireguard_private_key.clone(),
        wireguard_addresses: cli.wireguard_addresses.clone(),
        firewall_input_ports,
    };

    let catalog = Arc::new(ServerCatalog::new(CatalogConfig {
        inline_payload: cli.servers_json.clone(),
        file_path: cli.servers_file.clone(),
        skip_bundled: false,
        fetch_timeout: Duration::from_secs(cli.fetch_timeout),
    }));

    let executor = build_executor(&cli, tunnel).await?;

    let orchestrator = Arc::new(Orchestrator::new(
        catalog,
        executor,
        OrchestratorConfig {
            instance_limit: cli.instance_limit,
            listen_port: cli.proxy_port,
        },
    ));

    // Units from a previous run are not in the registry; remove them
    // before accepting new work
    let removed = orchestrator.cleanup_orphaned_units().await;
    if removed > 0 {
        warn!("Removed {} orphaned unit(s) from a previous run", removed);
    }

    match orchestrator.refresh_catalog(false).await {
        Ok(server_count) => info!(
            "Server catalog loaded: {} servers, instance limit {}",
            server_count, cli.instance_limit
        ),
        Err(e) => warn!("Server catalog unavailable at startup: {e}"),
    }

    let api = ApiServer::new(
        ApiServerConfig {
            bind_addr: cli.bind_addr,
            enable_cors: true,
        },
        orchestrator,
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let server_task = tokio::spawn(api.start());

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = server_task => {
            match result {
                Ok(Ok(())) => info!("API server stopped normally"),
                Ok(Err(e)) => {
                    return Err(e).context("API server error");
                }
                Err(e) => {
                    return Err(e).context("API server task panicked");
                }
            }
        }
    }

    info!("Geoproxy stopped");
    Ok(())
}
