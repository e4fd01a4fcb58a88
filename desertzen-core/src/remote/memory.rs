//! In-process remote favorites store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    FavoritesDocument, RemoteError, RemoteEvent, RemoteFavoritesStore, Subscription,
    SubscriptionHandle,
};
use crate::favorites::FavoriteSet;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<RemoteEvent>,
}

#[derive(Debug)]
struct Inner {
    documents: HashMap<String, FavoritesDocument>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    next_subscriber_id: u64,
    online: bool,
    denied: HashSet<String>,
}

impl Inner {
    fn check(&self, user_id: &str) -> Result<(), RemoteError> {
        if !self.online {
            return Err(RemoteError::Unavailable(
                "remote store is unreachable".to_string(),
            ));
        }
        if self.denied.contains(user_id) {
            return Err(RemoteError::PermissionDenied(format!(
                "no access to favorites of {}",
                user_id
            )));
        }
        Ok(())
    }

    fn document_mut(&mut self, user_id: &str) -> &mut FavoritesDocument {
        self.documents
            .entry(user_id.to_string())
            .or_insert_with(|| FavoritesDocument::new(user_id))
    }

    fn current(&self, user_id: &str) -> FavoriteSet {
        self.documents
            .get(user_id)
            .map(|doc| doc.favorites.clone())
            .unwrap_or_default()
    }

    /// Pushes the current set to every subscriber of `user_id`, dropping closed ones.
    fn notify(&mut self, user_id: &str) {
        let favorites = self.current(user_id);
        if let Some(subscribers) = self.subscribers.get_mut(user_id) {
            subscribers.retain(|s| {
                s.sender
                    .send(RemoteEvent::Snapshot(favorites.clone()))
                    .is_ok()
            });
        }
    }
}

/// Remote store that keeps favorites documents in memory.
///
/// Connectivity can be switched off with [`set_online`](Self::set_online):
/// every call then fails with `Unavailable` and subscribers receive an error
/// event, followed by a fresh snapshot once the store is back online.
#[derive(Debug, Clone)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                documents: HashMap::new(),
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
                online: true,
                denied: HashSet::new(),
            })),
        }
    }

    /// Seeds a document, bypassing connectivity and permission checks.
    pub fn insert_document<'a>(&self, user_id: &str, ids: impl IntoIterator<Item = &'a str>) {
        let mut inner = self.lock();
        inner.document_mut(user_id).add_all(ids);
        inner.notify(user_id);
    }

    /// Returns a copy of the stored document, bypassing connectivity checks.
    pub fn document(&self, user_id: &str) -> Option<FavoritesDocument> {
        self.lock().documents.get(user_id).cloned()
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Switches connectivity on or off and tells subscribers about it.
    pub fn set_online(&self, online: bool) {
        let mut inner = self.lock();
        if inner.online == online {
            return;
        }
        inner.online = online;

        if online {
            let users: Vec<String> = inner.subscribers.keys().cloned().collect();
            for user_id in users {
                inner.notify(&user_id);
            }
        } else {
            for subscribers in inner.subscribers.values_mut() {
                subscribers.retain(|s| {
                    s.sender
                        .send(RemoteEvent::Error(RemoteError::Unavailable(
                            "connection to remote store lost".to_string(),
                        )))
                        .is_ok()
                });
            }
        }
    }

    /// Makes every call for `user_id` fail with `PermissionDenied`.
    pub fn deny_user(&self, user_id: &str) {
        self.lock().denied.insert(user_id.to_string());
    }

    pub fn allow_user(&self, user_id: &str) {
        self.lock().denied.remove(user_id);
    }

    /// Number of live subscriptions for `user_id`.
    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.lock()
            .subscribers
            .get(user_id)
            .map(|subscribers| subscribers.iter().filter(|s| !s.sender.is_closed()).count())
            .unwrap_or(0)
    }

    /// Pushes a connectivity error to the subscribers of `user_id` without going offline.
    pub fn interrupt(&self, user_id: &str) {
        let mut inner = self.lock();
        if let Some(subscribers) = inner.subscribers.get_mut(user_id) {
            subscribers.retain(|s| {
                s.sender
                    .send(RemoteEvent::Error(RemoteError::Unavailable(
                        "listener interrupted".to_string(),
                    )))
                    .is_ok()
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unsubscribe(inner: &Weak<Mutex<Inner>>, user_id: &str, subscriber_id: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut inner = lock_inner(&inner);
    if let Some(subscribers) = inner.subscribers.get_mut(user_id) {
        subscribers.retain(|s| s.id != subscriber_id);
        if subscribers.is_empty() {
            inner.subscribers.remove(user_id);
        }
    }
}

#[async_trait]
impl RemoteFavoritesStore for MemoryRemoteStore {
    async fn ensure_document(&self, user_id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.check(user_id)?;
        if !inner.documents.contains_key(user_id) {
            inner.document_mut(user_id);
            inner.notify(user_id);
        }
        Ok(())
    }

    async fn read_favorites(&self, user_id: &str) -> Result<FavoriteSet, RemoteError> {
        let inner = self.lock();
        inner.check(user_id)?;
        inner
            .documents
            .get(user_id)
            .map(|doc| doc.favorites.clone())
            .ok_or(RemoteError::NotFound)
    }

    async fn add_favorite(&self, user_id: &str, id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.check(user_id)?;
        inner.document_mut(user_id).add_all([id]);
        inner.notify(user_id);
        Ok(())
    }

    async fn remove_favorite(&self, user_id: &str, id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.check(user_id)?;
        if let Some(doc) = inner.documents.get_mut(user_id) {
            doc.remove(id);
            inner.notify(user_id);
        }
        Ok(())
    }

    async fn merge_favorites(&self, user_id: &str, ids: &FavoriteSet) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.check(user_id)?;
        inner.document_mut(user_id).add_all(ids.iter());
        inner.notify(user_id);
        Ok(())
    }

    async fn subscribe(&self, user_id: &str) -> Result<Subscription, RemoteError> {
        let mut inner = self.lock();
        let (sender, receiver) = mpsc::unbounded_channel();

        match inner.check(user_id) {
            Ok(()) => {
                let favorites = inner.document_mut(user_id).favorites.clone();
                let _ = sender.send(RemoteEvent::Snapshot(favorites));
            }
            Err(err) if err.is_unavailable() => {
                let _ = sender.send(RemoteEvent::Error(err));
            }
            Err(err) => return Err(err),
        }

        let subscriber_id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner
            .subscribers
            .entry(user_id.to_string())
            .or_default()
            .push(Subscriber {
                id: subscriber_id,
                sender,
            });

        let weak = Arc::downgrade(&self.inner);
        let user_id = user_id.to_string();
        let handle = SubscriptionHandle::new(move || unsubscribe(&weak, &user_id, subscriber_id));

        Ok(Subscription::new(receiver, handle))
    }
}
