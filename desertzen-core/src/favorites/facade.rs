//! Single entry point for reading and changing favorites.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use super::{
    FavoriteSet, FavoritesSnapshot, LocalFavoritesCache, ReconciliationEngine, Session, SyncState,
};
use crate::catalog::{Catalog, Meditation};
use crate::remote::RemoteFavoritesStore;

/// Favorites of the current session.
///
/// Anonymous sessions read and write the local cache and are always
/// `Synced`. Authenticated sessions are served by the reconciliation engine.
/// Every change is published as a [`FavoritesSnapshot`] on a watch channel.
pub struct Favorites {
    cache: Arc<LocalFavoritesCache>,
    engine: Option<ReconciliationEngine>,
    session: Mutex<Session>,
    updates: Arc<watch::Sender<FavoritesSnapshot>>,
}

impl Favorites {
    pub fn new(remote: Arc<dyn RemoteFavoritesStore>, cache: Arc<LocalFavoritesCache>) -> Self {
        let engine = ReconciliationEngine::new(remote, cache.clone());
        let updates = engine.updates();
        Self::build(cache, Some(engine), updates)
    }

    /// Favorites without a remote store. Signed-in users are served from the
    /// local cache with status `Offline`.
    pub fn local_only(cache: Arc<LocalFavoritesCache>) -> Self {
        let (updates, _) = watch::channel(FavoritesSnapshot::default());
        Self::build(cache, None, Arc::new(updates))
    }

    fn build(
        cache: Arc<LocalFavoritesCache>,
        engine: Option<ReconciliationEngine>,
        updates: Arc<watch::Sender<FavoritesSnapshot>>,
    ) -> Self {
        let favorites = Self {
            cache,
            engine,
            session: Mutex::new(Session::Anonymous),
            updates,
        };
        favorites.publish_local(&Session::Anonymous);
        favorites
    }

    /// Switches to `session`. Repeating the current session does nothing.
    ///
    /// The previous session is torn down before the next one starts. Must be
    /// called within a Tokio runtime.
    pub fn set_session(&self, session: Session) {
        let mut current = self.lock_session();
        if *current == session {
            return;
        }
        tracing::info!("Favorites session: {} -> {}", current, session);

        if let Some(engine) = &self.engine {
            engine.stop();
        }
        *current = session.clone();

        match (&session, &self.engine) {
            (Session::Authenticated(user_id), Some(engine)) => engine.start(user_id),
            _ => self.publish_local(&session),
        }
    }

    pub fn session(&self) -> Session {
        self.lock_session().clone()
    }

    pub fn current_favorites(&self) -> FavoriteSet {
        match self.engine_for_session() {
            Some(engine) => engine.favorites(),
            None => self.cache.all(),
        }
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        match self.engine_for_session() {
            Some(engine) => engine.is_favorite(id),
            None => self.cache.has(id),
        }
    }

    pub fn status(&self) -> SyncState {
        match self.engine_for_session() {
            Some(engine) => engine.status(),
            None => self.local_status(&self.session()),
        }
    }

    pub async fn add(&self, id: &str) {
        match self.engine_for_session() {
            Some(engine) => engine.add(id).await,
            None => {
                self.cache.add(id);
                self.publish_local(&self.session());
            }
        }
    }

    pub async fn remove(&self, id: &str) {
        match self.engine_for_session() {
            Some(engine) => engine.remove(id).await,
            None => {
                self.cache.remove(id);
                self.publish_local(&self.session());
            }
        }
    }

    /// Adds `id` if absent, removes it otherwise. Returns whether it is now a favorite.
    pub async fn toggle(&self, id: &str) -> bool {
        if self.is_favorite(id) {
            self.remove(id).await;
            false
        } else {
            self.add(id).await;
            true
        }
    }

    /// Catalog entries that are favorites, in catalog order.
    pub fn favorite_meditations<'a>(&self, catalog: &'a Catalog) -> Vec<&'a Meditation> {
        let favorites = self.current_favorites();
        catalog
            .meditations()
            .iter()
            .filter(|meditation| favorites.contains(&meditation.id))
            .collect()
    }

    pub fn snapshot(&self) -> FavoritesSnapshot {
        self.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FavoritesSnapshot> {
        self.updates.subscribe()
    }

    /// Waits until the current session has finished loading.
    ///
    /// Returns `None` if it is still loading after `timeout`.
    pub async fn settled(&self, timeout: Duration) -> Option<FavoritesSnapshot> {
        let mut updates = self.updates.subscribe();
        let wait = updates.wait_for(|snapshot| !snapshot.status.is_loading());
        let settled = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(snapshot)) => Some(snapshot.clone()),
            _ => None,
        };
        settled
    }

    /// The engine, if it serves the current session.
    fn engine_for_session(&self) -> Option<&ReconciliationEngine> {
        match (&*self.lock_session(), &self.engine) {
            (Session::Authenticated(_), Some(engine)) => Some(engine),
            _ => None,
        }
    }

    fn local_status(&self, session: &Session) -> SyncState {
        match session {
            Session::Anonymous => SyncState::Synced,
            Session::Authenticated(_) => SyncState::Offline,
        }
    }

    fn publish_local(&self, session: &Session) {
        self.updates.send_replace(FavoritesSnapshot {
            session: session.clone(),
            favorites: self.cache.all(),
            status: self.local_status(session),
        });
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Favorites {
    fn drop(&mut self) {
        if let Some(engine) = &self.engine {
            engine.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, RemoteFavoritesStore};
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(2);

    fn set(ids: &[&str]) -> FavoriteSet {
        ids.iter().copied().collect()
    }

    fn setup() -> (Favorites, MemoryRemoteStore, Arc<LocalFavoritesCache>) {
        let remote = MemoryRemoteStore::new();
        let cache = Arc::new(LocalFavoritesCache::in_memory());
        let favorites = Favorites::new(Arc::new(remote.clone()), cache.clone());
        (favorites, remote, cache)
    }

    async fn wait_for(
        favorites: &Favorites,
        mut predicate: impl FnMut(&FavoritesSnapshot) -> bool,
    ) -> FavoritesSnapshot {
        let mut updates = favorites.subscribe();
        let snapshot = tokio::time::timeout(WAIT, updates.wait_for(|snapshot| predicate(snapshot)))
            .await
            .expect("timed out waiting for favorites")
            .expect("updates channel closed")
            .clone();
        snapshot
    }

    fn alice() -> Session {
        Session::Authenticated("alice".to_string())
    }

    #[tokio::test]
    async fn test_anonymous_uses_local_cache() {
        let (favorites, remote, cache) = setup();

        favorites.add("1").await;
        favorites.add("2").await;
        favorites.remove("1").await;

        assert_eq!(favorites.status(), SyncState::Synced);
        assert_eq!(favorites.current_favorites(), set(&["2"]));
        assert!(cache.has("2"));
        assert!(remote.document("alice").is_none());
        assert_eq!(favorites.snapshot().favorites, set(&["2"]));
    }

    #[tokio::test]
    async fn test_anonymous_favorites_survive_restart() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = Arc::new(LocalFavoritesCache::open(temp_dir.path()).unwrap());
            let favorites = Favorites::local_only(cache);
            favorites.add("4").await;
        }

        let cache = Arc::new(LocalFavoritesCache::open(temp_dir.path()).unwrap());
        let favorites = Favorites::local_only(cache);
        assert!(favorites.is_favorite("4"));
    }

    #[tokio::test]
    async fn test_sign_in_merges_and_serves_remote() {
        let (favorites, remote, cache) = setup();
        remote.insert_document("alice", ["7"]);
        favorites.add("3").await;
        favorites.add("7").await;

        favorites.set_session(alice());
        let snapshot = favorites.settled(WAIT).await.unwrap();

        assert_eq!(snapshot.session, alice());
        assert_eq!(snapshot.status, SyncState::Synced);
        assert_eq!(favorites.current_favorites(), set(&["3", "7"]));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_routing_switches_synchronously() {
        let (favorites, _remote, cache) = setup();
        cache.add("1");

        favorites.set_session(alice());
        assert_eq!(favorites.session(), alice());
        assert!(favorites.status().is_loading());

        favorites.set_session(Session::Anonymous);
        assert_eq!(favorites.status(), SyncState::Synced);
        assert_eq!(favorites.snapshot().session, Session::Anonymous);
    }

    #[tokio::test]
    async fn test_repeated_session_is_noop() {
        let (favorites, remote, _cache) = setup();
        favorites.set_session(alice());
        favorites.settled(WAIT).await.unwrap();

        favorites.set_session(alice());

        assert_eq!(favorites.status(), SyncState::Synced);
        assert_eq!(remote.subscriber_count("alice"), 1);
    }

    #[tokio::test]
    async fn test_authenticated_mutations_reach_remote() {
        let (favorites, remote, cache) = setup();
        favorites.set_session(alice());
        favorites.settled(WAIT).await.unwrap();

        assert!(favorites.toggle("5").await);
        assert!(favorites.is_favorite("5"));
        assert!(remote.document("alice").unwrap().favorites.contains("5"));
        assert!(!cache.has("5"));

        assert!(!favorites.toggle("5").await);
        assert!(!remote.document("alice").unwrap().favorites.contains("5"));
    }

    #[tokio::test]
    async fn test_offline_add_is_kept_and_cached() {
        let (favorites, remote, cache) = setup();
        favorites.set_session(alice());
        favorites.settled(WAIT).await.unwrap();

        remote.set_online(false);
        favorites.add("5").await;

        assert!(favorites.is_favorite("5"));
        assert!(cache.has("5"));
        assert_eq!(favorites.status(), SyncState::Offline);
    }

    #[tokio::test]
    async fn test_denied_add_surfaces_error() {
        let (favorites, remote, _cache) = setup();
        favorites.set_session(alice());
        favorites.settled(WAIT).await.unwrap();

        remote.deny_user("alice");
        favorites.add("5").await;

        assert!(!favorites.is_favorite("5"));
        let snapshot = favorites.snapshot();
        assert!(!snapshot.favorites.contains("5"));
        assert!(snapshot.status.error_message().unwrap().contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_subscription_error_keeps_favorites_visible() {
        let (favorites, remote, _cache) = setup();
        remote.insert_document("alice", ["1", "2"]);
        favorites.set_session(alice());
        favorites.settled(WAIT).await.unwrap();

        remote.set_online(false);
        wait_for(&favorites, |snapshot| snapshot.status.is_offline()).await;

        assert_eq!(favorites.current_favorites(), set(&["1", "2"]));
    }

    #[tokio::test]
    async fn test_switching_users_cancels_previous_subscription() {
        let (favorites, remote, _cache) = setup();
        remote.insert_document("alice", ["a1"]);
        remote.insert_document("bob", ["b1"]);

        favorites.set_session(alice());
        favorites.settled(WAIT).await.unwrap();
        assert_eq!(remote.subscriber_count("alice"), 1);

        favorites.set_session(Session::Authenticated("bob".to_string()));
        assert_eq!(remote.subscriber_count("alice"), 0);

        let snapshot = favorites.settled(WAIT).await.unwrap();
        assert_eq!(snapshot.session, Session::Authenticated("bob".to_string()));
        assert_eq!(snapshot.favorites, set(&["b1"]));

        remote.add_favorite("alice", "a2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(favorites.current_favorites(), set(&["b1"]));
        assert_eq!(favorites.snapshot().favorites, set(&["b1"]));
    }

    #[tokio::test]
    async fn test_sign_out_returns_to_local_cache() {
        let (favorites, remote, cache) = setup();
        remote.insert_document("alice", ["1"]);
        favorites.set_session(alice());
        favorites.settled(WAIT).await.unwrap();

        favorites.set_session(Session::Anonymous);

        assert_eq!(remote.subscriber_count("alice"), 0);
        assert!(favorites.current_favorites().is_empty());
        assert_eq!(favorites.status(), SyncState::Synced);

        favorites.add("9").await;
        assert!(cache.has("9"));
        assert!(!remote.document("alice").unwrap().favorites.contains("9"));
    }

    #[tokio::test]
    async fn test_drop_cancels_subscription() {
        let (favorites, remote, _cache) = setup();
        favorites.set_session(alice());
        favorites.settled(WAIT).await.unwrap();

        drop(favorites);

        assert_eq!(remote.subscriber_count("alice"), 0);
    }

    #[tokio::test]
    async fn test_local_only_signed_in_is_offline() {
        let cache = Arc::new(LocalFavoritesCache::in_memory());
        let favorites = Favorites::local_only(cache.clone());

        favorites.set_session(alice());
        favorites.add("3").await;

        assert_eq!(favorites.status(), SyncState::Offline);
        assert!(cache.has("3"));
        assert_eq!(favorites.snapshot().status, SyncState::Offline);
    }

    #[tokio::test]
    async fn test_favorite_meditations_in_catalog_order() {
        let (favorites, _remote, _cache) = setup();
        let catalog = Catalog::builtin().unwrap();

        favorites.add("8").await;
        favorites.add("unknown").await;
        favorites.add("2").await;

        let titles: Vec<&str> = favorites
            .favorite_meditations(&catalog)
            .iter()
            .map(|meditation| meditation.title.as_str())
            .collect();
        assert_eq!(
            titles,
            vec!["Drifting into Rest", "Embracing Inner Strength and Peace"]
        );
    }
}
