//! Sign-in commands for the zen CLI.
//!
//! Signing in records the user id locally. When a favorites server is
//! configured, the favorites saved on this device are merged into the user's
//! favorites right away.

use desertzen_core::{check_server, Session, SyncState};

use super::{activate, open_favorites, CommandError};
use crate::config::Config;
use crate::session::SessionStore;

pub async fn login(config: &Config, user_id: &str) -> Result<(), CommandError> {
    let user_id = user_id.trim();
    if user_id.is_empty() || user_id.chars().any(char::is_whitespace) {
        return Err(CommandError::InvalidUserId(user_id.to_string()));
    }

    let store = SessionStore::new(&config.data_dir.value);
    store.save(user_id)?;

    if !config.server.is_configured() {
        println!("Signed in as {}", user_id);
        println!("No favorites server configured; favorites stay on this device.");
        return Ok(());
    }

    let favorites = open_favorites(config)?;
    let pending = favorites.current_favorites().len();
    activate(&favorites, Session::Authenticated(user_id.to_string()), config).await;

    match favorites.status() {
        SyncState::Synced => {
            println!("Signed in as {}", user_id);
            if pending > 0 {
                println!("Merged {} favorite(s) from this device.", pending);
            }
            println!("Favorites: {}", favorites.current_favorites().len());
        }
        SyncState::Offline => {
            println!("Signed in as {} (offline)", user_id);
            println!("Favorites on this device will sync when the server is reachable.");
        }
        SyncState::Error(message) => {
            println!("Signed in as {}", user_id);
            return Err(CommandError::SyncFailed(message));
        }
        SyncState::Idle | SyncState::Loading => {
            println!("Signed in as {} (favorites still loading)", user_id);
        }
    }
    Ok(())
}

pub fn logout(config: &Config) -> Result<(), CommandError> {
    let store = SessionStore::new(&config.data_dir.value);

    match store.load()? {
        Session::Authenticated(user_id) => {
            store.clear()?;
            tracing::debug!("Removed session file {}", store.path().display());
            println!("Signed out {}", user_id);
        }
        Session::Anonymous => println!("Not signed in"),
    }
    Ok(())
}

pub async fn whoami(config: &Config) -> Result<(), CommandError> {
    let session = SessionStore::new(&config.data_dir.value).load()?;

    match session.user_id() {
        Some(user_id) => println!("{}", user_id),
        None => println!("Not signed in"),
    }

    if let Some(url) = &config.server.url {
        let reachable = check_server(url).await;
        println!(
            "Server: {} ({})",
            url,
            if reachable { "reachable" } else { "unreachable" }
        );
    }
    Ok(())
}
