use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pollwire::config::Config;
use pollwire::indexer::IndexerClient;
use pollwire::metrics;
use pollwire::service::PollService;

#[derive(Parser)]
#[command(
    name = "pollwire",
    version,
    about = "Distils recent social posts into binary polls and publishes them",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML configuration file (environment variables otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run iterations on the configured interval
    Run,

    /// Run a single iteration and exit
    Once {
        /// Print the Prometheus metrics after the report
        #[arg(long)]
        metrics: bool,
    },

    /// Print the recent poll titles the model is told to avoid
    Titles,

    /// Validate configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to register metrics");
    }

    tracing::info!(app = %config.service.app_name, "pollwire starting");

    match cli.command {
        Commands::Run => {
            config.validate().context("Invalid configuration")?;
            let mut service = PollService::from_config(config)?;
            service.run_loop().await;
        }

        Commands::Once { metrics: show_metrics } => {
            config.validate().context("Invalid configuration")?;
            let mut service = PollService::from_config(config)?;
            let report = service.run_iteration().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if show_metrics {
                let text = metrics::encode_metrics()
                    .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {e}"))?;
                print!("{text}");
            }
        }

        Commands::Titles => titles(&config).await?,

        Commands::CheckConfig => check_config(&config)?,
    }

    tracing::info!("pollwire finished");
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("pollwire=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("pollwire={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}

async fn titles(config: &Config) -> Result<()> {
    let indexer = IndexerClient::from_settings(&config.indexer);
    let titles = indexer
        .recent_titles()
        .await
        .context("Failed to load recent poll titles")?;

    if titles.is_empty() {
        println!("No recent poll titles");
    }
    for title in titles {
        println!("{title}");
    }
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    config.validate()?;

    println!("Configuration OK");
    println!("  X_HANDLES: {}", config.sources.handles.len());
    println!("  PRIVATE_WIRES: {}", config.sources.private_wires.len());
    println!("  Batch size: {}", config.sources.batch_size);
    println!("  Model: {}", config.llm.model);
    println!("  Interval: {}s", config.service.poll_interval_secs);
    println!(
        "  Indexer: {}",
        if config.indexer.endpoint.is_empty() { "not configured" } else { "configured" }
    );
    println!(
        "  Chain: {}",
        if config.chain.api_token.is_empty() { "not configured" } else { "configured" }
    );
    println!(
        "  Social: {}",
        if config.social.is_configured() { "configured" } else { "not configured" }
    );
    println!(
        "  Telegram: {} group(s), {} channel(s)",
        config.chat.group_chat_ids.len(),
        config.chat.channel_chat_ids.len()
    );
    Ok(())
}
