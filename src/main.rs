mod cache;
mod cli;
mod config;
mod db;
mod error;
mod gateway;
mod models;
mod pipeline;
mod server;
mod xmltv;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::{load_config, validate_config};
use crate::gateway::Gateway;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    validate_config(&config).context("config validation failed")?;
    info!(config_path = %cli.config.display(), "config loaded and validated");

    match cli.command {
        Some(Commands::Validate) => {
            println!("Configuration is valid.");
        }
        Some(Commands::Generate { output }) => {
            let pool = db::create_pool(&config.cache.path).await.context("opening cache database")?;

            let mut gateway = Gateway::new(&config)?;
            let cache_pool = config.cache.enabled.then_some(&pool);
            if !config.cache.enabled {
                info!("caching is disabled via configuration");
            }

            let guide = pipeline::assemble_guide(
                &mut gateway,
                cache_pool,
                config.guide.days,
                config.guide.hours,
                config.cache_ttl(),
            )
            .await?;

            if !guide.is_complete() {
                warn!(
                    merged = guide.windows_merged,
                    expected = guide.windows_expected,
                    "guide is incomplete, writing partial output"
                );
            }

            let xml = xmltv::render(&guide, config.timezone());
            let output_path = output.unwrap_or_else(|| config.guide.output_filename.clone());
            std::fs::write(&output_path, &xml)
                .with_context(|| format!("writing XMLTV output to {}", output_path.display()))?;

            println!(
                "Wrote {} ({} channels, {} programmes)",
                output_path.display(),
                guide.channels.len(),
                guide.programmes.len()
            );
        }
        Some(Commands::ClearCache) => {
            let pool = db::create_pool(&config.cache.path).await.context("opening cache database")?;
            cache::clear(&pool).await.context("clearing cache")?;
            println!("Cache cleared.");
        }
        None => {
            let pool = db::create_pool(&config.cache.path).await.context("opening cache database")?;
            server::run(config, pool).await?;
        }
    }

    Ok(())
}
