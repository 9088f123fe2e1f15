use anyhow::Context;
use clap::{Parser, ValueEnum};
use pooled_http::config::Config;
use pooled_http::{global, PoolStats};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FlavorArg {
    /// Blocking pool with certificate validation
    Plain,
    /// Blocking pool that accepts any server certificate (insecure)
    TrustAll,
    /// Async pool
    Async,
}

#[derive(Parser, Debug)]
#[command(name = "pooled-http")]
#[command(about = "Pooled HTTP connection manager with idle-connection reaping", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Pool flavor used to lease connections
    #[arg(long, value_enum, default_value = "plain")]
    flavor: FlavorArg,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,

    /// Target URIs to open a pooled connection to
    #[arg(value_name = "URI")]
    targets: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle config generation
    if let Some(config_path) = args.generate_config {
        println!("Generating example configuration file: {:?}", config_path);
        Config::create_example(&config_path)?;
        println!("Example configuration file created successfully!");
        println!(
            "Edit the file and run: pooled-http --config {:?} <URI>...",
            config_path
        );
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, &config.logging.format)?;

    info!("pooled-http v{} starting", env!("CARGO_PKG_VERSION"));
    if args.config.is_none() {
        info!("No configuration file specified, using defaults");
    }

    let settings = config.client_settings()?;
    let targets = args.targets;

    let stats = match args.flavor {
        FlavorArg::Plain => {
            let manager = global::configure_plain(settings)?;
            tokio::task::spawn_blocking(move || lease_blocking(manager, &targets)).await??
        }
        FlavorArg::TrustAll => {
            warn!("Using the trust-all pool: server certificates are NOT verified");
            let manager = global::configure_trust_all(settings)?;
            tokio::task::spawn_blocking(move || lease_blocking(manager, &targets)).await??
        }
        FlavorArg::Async => {
            let manager = global::configure_async(settings)?;
            let client = manager.client()?;

            let leases =
                futures::future::join_all(targets.iter().map(|uri| client.lease_uri(uri))).await;
            for (uri, lease) in targets.iter().zip(leases) {
                match lease {
                    Ok(lease) => {
                        info!("Leased {} for {}", lease.id(), uri);
                        lease.release();
                    }
                    Err(e) => warn!("Failed to lease connection for {}: {}", uri, e),
                }
            }
            manager.stats()
        }
    };

    if let Some(stats) = stats {
        print_stats(&stats)?;
    }

    // Joins the reaper thread
    tokio::task::spawn_blocking(global::shutdown_all).await?;

    Ok(())
}

fn lease_blocking(
    manager: &'static pooled_http::PoolManager<pooled_http::client::Blocking>,
    targets: &[String],
) -> anyhow::Result<Option<PoolStats>> {
    let client = manager.client()?;

    for uri in targets {
        match client.lease_uri(uri) {
            Ok(lease) => {
                info!("Leased {} for {}", lease.id(), uri);
                lease.release();
            }
            Err(e) => warn!("Failed to lease connection for {}: {}", uri, e),
        }
    }

    Ok(manager.stats())
}

fn print_stats(stats: &PoolStats) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(stats).context("serializing pool stats")?;
    println!("{}", json);
    Ok(())
}

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(level)
        .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", level, e))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    Ok(())
}
