//! Cosmo worker
//!
//! Runs the jobs and/or streams processors against a NATS JetStream broker,
//! with handlers wired in `handlers`.

mod handlers;

use clap::{Parser, Subcommand};
use cosmo_nats::{
    BrokerClient, CosmoConfig, Engine, EngineOptions, ProcessorSelection, Settings,
};
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "cosmo")]
#[command(about = "NATS JetStream background-job and stream-processing worker")]
struct Cli {
    /// Path to the worker configuration file
    #[arg(short = 'C', long, default_value = "cosmo.yml")]
    config: PathBuf,

    /// Maximum concurrent handler invocations
    #[arg(short = 'c', long, default_value_t = 1)]
    concurrency: usize,

    /// Seconds to wait for running handlers on shutdown
    #[arg(short = 't', long, default_value_t = 25)]
    timeout: u64,

    /// Create the configured streams, then exit
    #[arg(short = 'S', long)]
    setup: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run only the jobs processor
    Jobs,
    /// Run only the streams processor
    Streams,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let config = CosmoConfig::from_yaml_file(&cli.config)
        .wrap_err_with(|| format!("failed to load {}", cli.config.display()))?;
    let settings = Settings::from_env();

    let client = Arc::new(BrokerClient::connect(&settings.nats_url).await?);
    info!(nats_url = %settings.nats_url, "Connected to NATS");

    let selection = match cli.command {
        Some(Command::Jobs) => ProcessorSelection::Jobs,
        Some(Command::Streams) => ProcessorSelection::Streams,
        None => ProcessorSelection::Both,
    };
    let options = EngineOptions::default()
        .with_selection(selection)
        .with_concurrency(cli.concurrency)
        .with_shutdown_timeout(Duration::from_secs(cli.timeout));

    let registry = Arc::new(handlers::build_registry());
    let engine = Engine::new(client, registry, config, settings, options);

    if cli.setup {
        engine.ensure_streams().await?;
        info!("Streams created, exiting");
        return Ok(());
    }

    engine.run().await?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let is_prod = std::env::var("APP_ENV")
        .map(|e| e.eq_ignore_ascii_case("production"))
        .unwrap_or(false);

    if is_prod {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init();
    }
}
