//! Insight CLI - Main entry point

mod demo;

use clap::{Parser, Subcommand};
use insight_foundation::{EngineSettings, JsonStore, ENGINE_CONFIG_FILE};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Insight - in-process background task engine
#[derive(Parser, Debug)]
#[command(name = "insight")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Number of workers (overrides engine.json)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Maximum number of tasks held by the registry
    #[arg(long)]
    max_tasks: Option<usize>,

    /// Default task timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a demo analysis workload and print every task's final state
    Run {
        /// Number of analysis tasks to submit
        #[arg(short, long, default_value = "6")]
        count: usize,

        /// Progress steps per task
        #[arg(short, long, default_value = "10")]
        steps: u32,
    },
    /// Show the effective engine configuration
    Config {
        /// Write the effective settings to ./.insight/engine.json
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration: global -> project -> command line
    let mut settings = EngineSettings::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load engine config: {}", e);
        EngineSettings::default()
    });
    settings.merge(EngineSettings {
        max_workers: args.workers,
        max_tasks: args.max_tasks,
        default_timeout_secs: args.timeout,
        ..Default::default()
    });

    match args.command.unwrap_or(Command::Run { count: 6, steps: 10 }) {
        Command::Run { count, steps } => {
            let config = settings.into_config()?;
            demo::run(config, count, steps).await?;
        }
        Command::Config { save } => {
            if save {
                let store = JsonStore::current_project()?;
                settings.save_to(&store)?;
                println!("Saved {}", store.file_path(ENGINE_CONFIG_FILE).display());
            }
            let config = settings.into_config()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
