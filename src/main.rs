use anyhow::Context;
use clap::{Parser, Subcommand};
use configuration::{Config, DEFAULT_CONFIG_PATH, init_tracing, load_config_from};
use engine::{Bot, paper_gateway};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// The main entry point for the order-book trading bot.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; it only carries optional overrides.
    let _ = dotenvy::dotenv();

    // Parse command-line arguments
    let cli = Cli::parse();

    // Execute the appropriate command
    match cli.command {
        Commands::Run(args) => handle_run(args).await,
        Commands::CheckConfig(args) => handle_check_config(args),
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// An automated trading bot that buys on price ticks and sells at a profit.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trade against the paper broker until Ctrl-C or the session deadline.
    Run(RunArgs),
    /// Load and validate the configuration, then print it.
    CheckConfig(ConfigArgs),
}

#[derive(Parser)]
struct ConfigArgs {
    /// Path to the configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[derive(Parser)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Stop after this many minutes. Overrides `session.duration_minutes`.
    #[arg(long)]
    duration_minutes: Option<u64>,

    /// Keep open positions when the session ends.
    #[arg(long)]
    no_sell_out: bool,
}

// ==============================================================================
// Command Logic
// ==============================================================================

fn handle_check_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = load_config_from(&args.config)
        .with_context(|| format!("Invalid configuration in {}", args.config))?;
    println!("Configuration in {} is valid.\n{config:#?}", args.config);
    Ok(())
}

async fn handle_run(args: RunArgs) -> anyhow::Result<()> {
    let mut config: Config = load_config_from(&args.config.config)
        .with_context(|| format!("Invalid configuration in {}", args.config.config))?;
    if args.duration_minutes.is_some() {
        config.session.duration_minutes = args.duration_minutes;
    }
    if args.no_sell_out {
        config.strategy.sell_out = false;
    }

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(&config.logging)?;

    // 1. The paper broker and its market feed.
    let (session_tx, session_rx) = watch::channel(false);
    let gateway = Arc::new(paper_gateway(&config));
    let feed = gateway.spawn_random_walk(
        config.paper.volatility,
        Duration::from_millis(config.paper.tick_interval_ms),
        config.paper.seed,
        session_rx.clone(),
    );

    // 2. The bot, cancelled by Ctrl-C or the session deadline.
    let mut bot = Bot::new(
        gateway.clone(),
        config.gateway.clone(),
        config.strategy.clone(),
        session_rx,
    )
    .await?;

    let deadline = config.session.duration_minutes.map(|m| Duration::from_secs(m * 60));
    let canceller = tokio::spawn(async move {
        match deadline {
            Some(deadline) => tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl-C received."),
                _ = tokio::time::sleep(deadline) => tracing::info!("Session deadline reached."),
            },
            None => {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Ctrl-C received.");
            }
        }
        session_tx.send_replace(true);
        // Keep the sender alive until the session is torn down.
        session_tx
    });

    tracing::info!(
        app = %config.gateway.app_name,
        account = %config.gateway.account_id,
        endpoint = %config.gateway.endpoint,
        "Starting bot."
    );
    let result = bot.run().await;

    // 3. Tear down the feed whichever way the run ended.
    canceller.abort();
    feed.abort();
    let summary = result?;

    println!("\n--- Session Summary ---");
    println!("Strategy profit:  {}", summary.strategy_profit);
    println!("Sell-out profit:  {}", summary.sell_out_profit);
    println!("Total:            {}", summary.total());
    Ok(())
}
