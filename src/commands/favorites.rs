use clap::{Args, Subcommand};
use desertzen_core::{Catalog, Favorites, SyncState};

use super::catalog::print_meditations;
use super::{activate, load_catalog, open_favorites, print_status_note, CommandError, OutputFormat};
use crate::config::Config;
use crate::session::SessionStore;

#[derive(Args)]
pub struct FavoritesCommand {
    #[command(subcommand)]
    pub command: FavoritesSubcommand,
}

#[derive(Subcommand)]
pub enum FavoritesSubcommand {
    /// List favorite meditations
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Add a meditation to favorites
    Add {
        /// Meditation ID
        id: String,
    },

    /// Remove a meditation from favorites
    Remove {
        /// Meditation ID
        id: String,
    },

    /// Add a meditation if it is not a favorite, remove it otherwise
    Toggle {
        /// Meditation ID
        id: String,
    },

    /// Show sync status
    Status {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl FavoritesCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let catalog = load_catalog(config)?;
        let favorites = open_favorites(config)?;
        let session = SessionStore::new(&config.data_dir.value).load()?;
        activate(&favorites, session, config).await;

        match &self.command {
            FavoritesSubcommand::List { format } => list(&favorites, &catalog, format),

            FavoritesSubcommand::Add { id } => {
                let title = meditation_title(&catalog, id)?;
                favorites.add(id).await;
                check_applied(&favorites)?;
                println!("Added to favorites: {}", title);
                print_status_note(&favorites.status());
                Ok(())
            }

            FavoritesSubcommand::Remove { id } => {
                favorites.remove(id).await;
                check_applied(&favorites)?;
                match catalog.get_by_id(id) {
                    Some(meditation) => println!("Removed from favorites: {}", meditation.title),
                    None => println!("Removed from favorites: {}", id),
                }
                print_status_note(&favorites.status());
                Ok(())
            }

            FavoritesSubcommand::Toggle { id } => {
                let title = meditation_title(&catalog, id)?;
                let added = favorites.toggle(id).await;
                check_applied(&favorites)?;
                if added {
                    println!("Added to favorites: {}", title);
                } else {
                    println!("Removed from favorites: {}", title);
                }
                print_status_note(&favorites.status());
                Ok(())
            }

            FavoritesSubcommand::Status { format } => status(&favorites, config, format),
        }
    }
}

fn meditation_title(catalog: &Catalog, id: &str) -> Result<String, CommandError> {
    catalog
        .get_by_id(id)
        .map(|meditation| meditation.title.clone())
        .ok_or_else(|| CommandError::UnknownMeditation(id.to_string()))
}

/// Fails if the last change was rolled back.
fn check_applied(favorites: &Favorites) -> Result<(), CommandError> {
    match favorites.status() {
        SyncState::Error(message) => Err(CommandError::SyncFailed(message)),
        _ => Ok(()),
    }
}

fn list(favorites: &Favorites, catalog: &Catalog, format: &OutputFormat) -> Result<(), CommandError> {
    let meditations = favorites.favorite_meditations(catalog);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&meditations)?);
        }
        OutputFormat::Text => {
            if meditations.is_empty() {
                println!("No favorites yet");
            } else {
                print_meditations(&meditations);
                println!("\nTotal: {} favorite(s)", meditations.len());
            }

            let unknown = favorites
                .current_favorites()
                .iter()
                .filter(|id| catalog.get_by_id(id).is_none())
                .count();
            if unknown > 0 {
                println!("({} favorite(s) not in the catalog)", unknown);
            }
            print_status_note(&favorites.status());
        }
    }
    Ok(())
}

fn status(favorites: &Favorites, config: &Config, format: &OutputFormat) -> Result<(), CommandError> {
    let snapshot = favorites.snapshot();
    let mode = if !snapshot.session.is_authenticated() {
        "local"
    } else if config.server.is_configured() {
        "remote"
    } else {
        "local (no server configured)"
    };

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "session": snapshot.session.user_id(),
                "mode": mode,
                "status": snapshot.status.to_string(),
                "favorites": snapshot.favorites,
                "server_url": config.server.url,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("Favorites");
            println!("=========\n");
            match snapshot.session.user_id() {
                Some(user_id) => println!("Signed in as: {}", user_id),
                None => println!("Signed in as: (anonymous)"),
            }
            println!("Source: {}", mode);
            if let Some(url) = &config.server.url {
                println!("Server: {}", url);
            }
            println!("Status: {}", snapshot.status);
            println!("Favorites: {}", snapshot.favorites.len());
        }
    }
    Ok(())
}
