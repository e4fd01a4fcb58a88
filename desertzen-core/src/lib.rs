//! Desert Zen Core Library
//!
//! Meditation catalog and the favorites synchronization subsystem shared by
//! the `zen` CLI and the favorites document server.

pub mod catalog;
pub mod favorites;
pub mod remote;

pub use catalog::{Catalog, CatalogError, Category, Meditation, MeditationLength};
pub use favorites::{
    FavoriteSet, Favorites, FavoritesSnapshot, LocalFavoritesCache, ReconciliationEngine,
    Session, StorageError, SyncState,
};
pub use remote::{
    check_server, FavoritesDocument, HttpRemoteStore, ItemsRequest, MemoryRemoteStore,
    RemoteError, RemoteEvent, RemoteFavoritesStore, Subscription, SubscriptionHandle,
    FAVORITES_COLLECTION,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
