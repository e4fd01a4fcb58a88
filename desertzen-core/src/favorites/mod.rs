//! Favorites synchronization.
//!
//! The favorites list lives in two places:
//! - the [`LocalFavoritesCache`], a persisted id set available without network or login
//! - the remote favorites document of the signed-in user
//!
//! The [`ReconciliationEngine`] merges the first into the second at sign-in and then
//! follows the remote document through a live subscription. The [`Favorites`] facade is
//! the single entry point for callers and routes to one or the other based on the
//! current [`Session`].
//!
//! # Session lifecycle
//!
//! 1. **Anonymous** - reads and writes go to the local cache, status is always `Synced`
//! 2. **Initializing** - local ids are merged into the remote document (union)
//! 3. **Subscribed** - every remote push replaces the in-memory set
//! 4. **Signed out** - the subscription is cancelled and the local cache is served again

mod engine;
mod facade;
mod local;
mod set;
mod state;

pub use engine::ReconciliationEngine;
pub use facade::Favorites;
pub use local::{LocalFavoritesCache, StorageError, STORAGE_KEY};
pub use set::FavoriteSet;
pub use state::{FavoritesSnapshot, Session, SyncState};
