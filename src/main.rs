//! Soundscape CLI - Ambient Sound Synthesis and Mixing
//!
//! Command-line interface for offline synthesis and scene rendering.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use soundscape::cli::{commands, Cli, Commands};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Soundscape v{}", env!("CARGO_PKG_VERSION"));

    let config = commands::load_config(cli.config.as_deref()).context("invalid configuration")?;

    match cli.command {
        Some(cmd) => handle_command(&config, cmd).await,
        None => {
            println!("Soundscape v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

async fn handle_command(config: &soundscape::config::EngineConfig, cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Categories => commands::list_categories(config)?,
        Commands::Generate {
            category,
            output,
            duration,
            seed,
            sample_rate,
            bit_depth,
        } => commands::generate(
            config,
            &category,
            &output,
            duration,
            seed,
            sample_rate,
            bit_depth,
        )
        .with_context(|| format!("failed to generate {}", category))?,
        Commands::Render {
            scene,
            output,
            seconds,
            assets,
            analyse,
            bit_depth,
        } => commands::render(
            config,
            &scene,
            &output,
            seconds,
            assets.as_deref(),
            analyse,
            bit_depth,
        )
        .await
        .with_context(|| format!("failed to render {}", scene.display()))?,
    }
    Ok(())
}
