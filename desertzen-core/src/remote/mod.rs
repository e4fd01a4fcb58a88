//! Remote favorites store.
//!
//! The remote store holds one favorites document per user and pushes the full
//! favorite set to subscribers whenever it changes. The reconciliation engine
//! only depends on the [`RemoteFavoritesStore`] trait; two implementations ship
//! with the crate:
//!
//! - [`HttpRemoteStore`] talks to the `desertzen-server` document server over
//!   HTTP, with subscriptions over a WebSocket
//! - [`MemoryRemoteStore`] keeps documents in process, with switchable
//!   connectivity and per-user permission failures

mod client;
mod document;
mod error;
mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::favorites::FavoriteSet;

pub use client::{check_server, HttpRemoteStore};
pub use document::{FavoritesDocument, ItemsRequest, FAVORITES_COLLECTION};
pub use error::RemoteError;
pub use memory::MemoryRemoteStore;

/// An event delivered on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// The full current favorite set.
    Snapshot(FavoriteSet),
    /// Connectivity was lost. The subscription stays alive.
    Error(RemoteError),
}

/// Cancels a subscription when called or dropped.
pub struct SubscriptionHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A live subscription to one user's favorites document.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::UnboundedReceiver<RemoteEvent>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<RemoteEvent>, handle: SubscriptionHandle) -> Self {
        Self { events, handle }
    }

    /// Waits for the next event. Returns `None` once the store stops producing events.
    pub async fn next(&mut self) -> Option<RemoteEvent> {
        self.events.recv().await
    }

    pub fn cancel(self) {
        self.handle.cancel();
    }

    /// Splits the event stream from its cancellation handle.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<RemoteEvent>, SubscriptionHandle) {
        (self.events, self.handle)
    }
}

/// Operations the reconciliation engine needs from the remote document store.
///
/// Every call fails with [`RemoteError::Unavailable`] when the store cannot be
/// reached. Add and remove are field-level union/difference operations and
/// succeed whether or not the id was already present.
#[async_trait]
pub trait RemoteFavoritesStore: Send + Sync {
    /// Creates an empty favorites document for `user_id` if none exists.
    async fn ensure_document(&self, user_id: &str) -> Result<(), RemoteError>;

    /// Point read of the user's favorites.
    async fn read_favorites(&self, user_id: &str) -> Result<FavoriteSet, RemoteError>;

    async fn add_favorite(&self, user_id: &str, id: &str) -> Result<(), RemoteError>;

    async fn remove_favorite(&self, user_id: &str, id: &str) -> Result<(), RemoteError>;

    /// Unions `ids` into the user's document, creating it if needed.
    async fn merge_favorites(&self, user_id: &str, ids: &FavoriteSet) -> Result<(), RemoteError> {
        self.ensure_document(user_id).await?;
        for id in ids.iter() {
            self.add_favorite(user_id, id).await?;
        }
        Ok(())
    }

    /// Subscribes to the user's document.
    ///
    /// The current set is delivered first, then again after every change,
    /// until the subscription is cancelled.
    async fn subscribe(&self, user_id: &str) -> Result<Subscription, RemoteError>;
}
