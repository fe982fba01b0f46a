use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use consul_discovery::ConsulDiscoveryService;
use consul_discovery::DiscoveryConfig;
use consul_discovery::DiscoveryContext;
use consul_discovery::Error;
use consul_discovery::GenerateIdOpts;
use consul_discovery::LOG_TARGET;
use consul_discovery::Result;
use consul_discovery::ServiceCheck;
use consul_discovery::ServiceRegistration;
use serde::Serialize;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing::error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

/// Query and register services through a Consul agent
#[derive(Debug, Parser)]
#[command(name = "consul-discovery", version)]
struct Cli {
    /// Agent host (overrides configuration)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Agent HTTP port (overrides configuration)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Extra configuration file applied over defaults and CONSUL_DISCOVERY_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print one healthy endpoint of a service
    Connection { service: String },
    /// Print every healthy endpoint of a service
    Connections { service: String },
    /// Print a KV entry
    Kv { key: String },
    /// Write a KV entry
    SetKv { key: String, value: String },
    /// Register this process and keep the registration alive until interrupted
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// HTTP health check URL
        #[arg(long)]
        http_check: Option<String>,
        /// Re-registration interval; register once and exit when absent
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// List services known to the local agent
    List,
    /// Print a fresh instance id
    GenerateId {
        service: String,
        #[arg(long)]
        local: Option<String>,
        #[arg(long)]
        remote: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    init_observability();
    let cli = Cli::parse();

    if let Command::GenerateId {
        service,
        local,
        remote,
        port,
    } = &cli.command
    {
        let opts = GenerateIdOpts {
            service_name: service.clone(),
            local_address: local.clone(),
            remote_address: remote.clone(),
            port: port.map(|p| p.to_string()),
        };
        println!("{}", ConsulDiscoveryService::generate_id(&opts));
        return Ok(());
    }

    let config = load_config(&cli)?;
    let context = DiscoveryContext::builder().config(config).build()?;
    let discovery = ConsulDiscoveryService::new(context)?;

    if let Err(e) = run(&discovery, cli.command).await {
        error!(target: LOG_TARGET, "command failed: {}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(
    discovery: &ConsulDiscoveryService,
    command: Command,
) -> Result<()> {
    match command {
        Command::Connection { service } => print_json(&discovery.get_connection(&service).await?),
        Command::Connections { service } => print_json(&discovery.get_connections(&service).await?),
        Command::Kv { key } => print_json(&discovery.get_kv(&key).await?),
        Command::SetKv { key, value } => print_json(&discovery.set_kv(&key, &value).await?),
        Command::List => print_json(&discovery.list().await?),
        Command::Register {
            name,
            id,
            address,
            port,
            tags,
            http_check,
            interval_ms,
        } => {
            let mut registration = ServiceRegistration::new(name).with_tags(tags);
            registration.id = id;
            registration.address = address;
            registration.port = port;
            if let Some(url) = http_check {
                registration = registration.with_check(ServiceCheck {
                    http: Some(url),
                    interval: Some("10s".to_string()),
                    ..Default::default()
                });
            }

            let interval = interval_ms.map(Duration::from_millis);
            discovery.register(registration, interval).await?;
            if interval.is_some() {
                info!(target: LOG_TARGET, "Registration scheduled. Waiting for CTRL+C signal...");
                graceful_shutdown().await?;
                discovery.clear();
            }
            Ok(())
        }
        Command::GenerateId { .. } => Ok(()),
    }
}

fn load_config(cli: &Cli) -> Result<DiscoveryConfig> {
    let mut config = DiscoveryConfig::new()?;
    if let Some(path) = &cli.config {
        let path = path
            .to_str()
            .ok_or_else(|| Error::InvalidConfig(format!("config path is not UTF-8: {}", path.display())))?;
        config = config.with_override_config(path)?;
    }
    if let Some(host) = &cli.host {
        config.registry.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.registry.port = port;
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| Error::Fatal(e.to_string()))?;
    println!("{rendered}");
    Ok(())
}

async fn graceful_shutdown() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(e.to_string()))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Fatal(e.to_string()))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!(target: LOG_TARGET, "SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!(target: LOG_TARGET, "SIGTERM detected.");
        },
    }
    info!(target: LOG_TARGET, "Shutdown completed");
    Ok(())
}

fn init_observability() {
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();
}
