mod auth;
mod catalog;
mod config_cmd;
mod favorites;

use std::sync::Arc;

use clap::ValueEnum;
use desertzen_core::{
    Catalog, CatalogError, Favorites, HttpRemoteStore, LocalFavoritesCache, RemoteError, Session,
    StorageError, SyncState,
};

use crate::config::Config;
use crate::session::SessionError;

pub use auth::{login, logout, whoami};
pub use catalog::CatalogCommand;
pub use config_cmd::ConfigCommand;
pub use favorites::FavoritesCommand;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Errors reported by CLI commands
#[derive(Debug)]
pub enum CommandError {
    Storage(StorageError),
    Catalog(CatalogError),
    Remote(RemoteError),
    Session(SessionError),
    Json(serde_json::Error),
    UnknownMeditation(String),
    UnknownCategory(String),
    InvalidUserId(String),
    /// The change was rejected by the favorites server
    SyncFailed(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Storage(e) => write!(f, "{}", e),
            CommandError::Catalog(e) => write!(f, "{}", e),
            CommandError::Remote(e) => write!(f, "{}", e),
            CommandError::Session(e) => write!(f, "{}", e),
            CommandError::Json(e) => write!(f, "JSON error: {}", e),
            CommandError::UnknownMeditation(id) => write!(f, "Meditation not found: {}", id),
            CommandError::UnknownCategory(id) => write!(f, "Category not found: {}", id),
            CommandError::InvalidUserId(id) => write!(f, "Invalid user id: '{}'", id),
            CommandError::SyncFailed(message) => write!(f, "Sync failed: {}", message),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<StorageError> for CommandError {
    fn from(e: StorageError) -> Self {
        CommandError::Storage(e)
    }
}

impl From<CatalogError> for CommandError {
    fn from(e: CatalogError) -> Self {
        CommandError::Catalog(e)
    }
}

impl From<RemoteError> for CommandError {
    fn from(e: RemoteError) -> Self {
        CommandError::Remote(e)
    }
}

impl From<SessionError> for CommandError {
    fn from(e: SessionError) -> Self {
        CommandError::Session(e)
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(e: serde_json::Error) -> Self {
        CommandError::Json(e)
    }
}

/// Loads the configured catalog, or the built-in one.
fn load_catalog(config: &Config) -> Result<Catalog, CommandError> {
    let catalog = match &config.catalog_path.value {
        Some(path) => Catalog::load(path)?,
        None => Catalog::builtin()?,
    };
    Ok(catalog)
}

/// Opens the favorites of this device, backed by the server when one is configured.
fn open_favorites(config: &Config) -> Result<Favorites, CommandError> {
    let cache = Arc::new(LocalFavoritesCache::open(&config.data_dir.value)?);

    match &config.server.url {
        Some(url) => {
            let remote = HttpRemoteStore::new(url.clone(), config.server.api_key.clone())?;
            Ok(Favorites::new(Arc::new(remote), cache))
        }
        None => Ok(Favorites::local_only(cache)),
    }
}

/// Switches to `session` and waits for the initial sync.
async fn activate(favorites: &Favorites, session: Session, config: &Config) {
    let authenticated = session.is_authenticated();
    favorites.set_session(session);

    if authenticated
        && favorites
            .settled(config.server.sync_timeout())
            .await
            .is_none()
    {
        tracing::warn!("Favorites are still loading, showing last known state");
    }
}

/// Prints a note for any status other than `Synced`.
fn print_status_note(status: &SyncState) {
    match status {
        SyncState::Offline => {
            println!("Offline: changes are saved on this device and will sync when back online.")
        }
        SyncState::Error(message) => println!("Sync error: {}", message),
        SyncState::Idle | SyncState::Loading => println!("Favorites are still loading."),
        SyncState::Synced => {}
    }
}
