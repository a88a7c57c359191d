//! NexentaStor CSI Driver
//!
//! Loads the driver configuration, builds the appliance cluster and checks
//! connectivity to every configured endpoint.

use anyhow::Context;
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nexentastor_csi::config::DEFAULT_CONFIG_PATH;
use nexentastor_csi::{Config, Overrides, ProviderFactory, RequestContext, StorageProvider};

const DEFAULT_ENDPOINT: &str =
    "unix:///var/lib/kubelet/plugins/com.nexenta.nexentastor-csi-plugin/csi.sock";

// =============================================================================
// CLI Arguments
// =============================================================================

/// NexentaStor CSI Driver - storage provider for NexentaStor appliances
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, env = "NEXENTASTOR_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Kubernetes node ID
    #[arg(long, env = "NODE_ID", default_value = "")]
    nodeid: String,

    /// CSI endpoint
    #[arg(long, env = "CSI_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// NexentaStor API address [schema://host:port,...]
    #[arg(long)]
    address: Option<String>,

    /// Overwrite NexentaStor API username from config
    #[arg(long)]
    username: Option<String>,

    /// Overwrite NexentaStor API password from config
    #[arg(long)]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Start driver with:");
    info!("  Version: {}", nexentastor_csi::VERSION);
    info!("  CSI endpoint: '{}'", args.endpoint);
    info!("  Node ID: '{}'", args.nodeid);

    let mut config = if Path::new(&args.config).exists() {
        Config::read(&args.config)
            .with_context(|| format!("cannot read config file '{}'", args.config))?
    } else {
        warn!("config file '{}' not found, using command line options", args.config);
        Config::default()
    };
    config.apply_overrides(Overrides {
        address: args.address.clone(),
        username: args.username.clone(),
        password: args.password.clone(),
    });
    config.validate().context("invalid driver configuration")?;
    info!("  NS address: '{}'", config.address);

    let cluster = ProviderFactory::from_config(&config)?;

    let ctx = RequestContext::with_timeout(Duration::from_secs(config.request_timeout_secs * 2));
    for status in cluster.check_health(&ctx).await? {
        match &status.last_error {
            None => info!("endpoint {} is healthy", status.address),
            Some(err) => warn!("endpoint {} is unhealthy: {}", status.address, err),
        }
    }

    let pools = cluster
        .get_pools(&ctx)
        .await
        .with_context(|| format!("cannot list pools on {}", cluster.active_endpoint()))?;
    info!(
        "active endpoint {} reports pools: {}",
        cluster.active_endpoint(),
        pools.join(", ")
    );

    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=info".parse()?)
        .add_directive("rustls=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
