use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod session;

use commands::{CatalogCommand, ConfigCommand, FavoritesCommand};
use config::Config;

#[derive(Parser)]
#[command(name = "zen")]
#[command(version)]
#[command(about = "Browse Desert Zen meditations and keep your favorites in sync", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and merge this device's favorites into your account
    Login {
        /// User ID
        user_id: String,
    },

    /// Sign out; favorites saved on this device are kept
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Manage favorite meditations
    Favorites(FavoritesCommand),

    /// Browse the meditation catalog
    Catalog(CatalogCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Login { user_id }) => {
            commands::login(&config, &user_id).await?;
        }
        Some(Commands::Logout) => {
            commands::logout(&config)?;
        }
        Some(Commands::Whoami) => {
            commands::whoami(&config).await?;
        }
        Some(Commands::Favorites(cmd)) => {
            cmd.run(&config).await?;
        }
        Some(Commands::Catalog(cmd)) => {
            cmd.run(&config)?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
