//! Reconciliation between the local cache and a user's remote favorites document.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{FavoriteSet, FavoritesSnapshot, LocalFavoritesCache, Session, SyncState};
use crate::remote::{RemoteError, RemoteEvent, RemoteFavoritesStore, SubscriptionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Add,
    Remove,
}

#[derive(Debug, Default)]
struct EngineState {
    /// Bumped on every session start and stop. Work tagged with an older
    /// generation belongs to a torn-down session and is dropped.
    generation: u64,
    user_id: Option<String>,
    favorites: FavoriteSet,
    status: SyncState,
    /// Local cache still holds ids that are not in the remote document.
    pending_merge: bool,
    /// Number of pushes applied in this session.
    pushes: u64,
    subscription: Option<SubscriptionHandle>,
    task: Option<JoinHandle<()>>,
}

impl EngineState {
    fn snapshot(&self) -> FavoritesSnapshot {
        FavoritesSnapshot {
            session: Session::from_user(self.user_id.clone()),
            favorites: self.favorites.clone(),
            status: self.status.clone(),
        }
    }

    fn reset(&mut self) -> (Option<SubscriptionHandle>, Option<JoinHandle<()>>) {
        self.generation += 1;
        self.user_id = None;
        self.favorites = FavoriteSet::new();
        self.status = SyncState::Idle;
        self.pending_merge = false;
        self.pushes = 0;
        (self.subscription.take(), self.task.take())
    }
}

struct Shared {
    state: Mutex<EngineState>,
    updates: Arc<watch::Sender<FavoritesSnapshot>>,
    /// Serializes remote writes so a merge never lands after a later remove.
    writes: tokio::sync::Mutex<()>,
}

/// Keeps the favorites of one signed-in user in sync with the remote store.
///
/// On [`start`](Self::start) the local cache is merged into the user's
/// document, then the engine follows the document through a subscription.
/// Each push replaces the in-memory set. Mutations are applied optimistically
/// and settled when the remote call returns.
///
/// Failures never escape: they are reported through [`status`](Self::status).
/// At most one session is active; starting a new one tears down the previous
/// subscription first.
#[derive(Clone)]
pub struct ReconciliationEngine {
    remote: Arc<dyn RemoteFavoritesStore>,
    cache: Arc<LocalFavoritesCache>,
    shared: Arc<Shared>,
}

impl ReconciliationEngine {
    pub fn new(remote: Arc<dyn RemoteFavoritesStore>, cache: Arc<LocalFavoritesCache>) -> Self {
        let (updates, _) = watch::channel(FavoritesSnapshot::default());
        Self {
            remote,
            cache,
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::default()),
                updates: Arc::new(updates),
                writes: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Starts a session for `user_id`, ending any session in progress.
    ///
    /// Returns immediately with status `Loading`; the merge and subscription
    /// run on a spawned task. Must be called within a Tokio runtime.
    pub fn start(&self, user_id: &str) {
        self.stop();

        let generation = {
            let mut state = self.lock();
            state.user_id = Some(user_id.to_string());
            state.favorites = self.cache.all();
            state.status = SyncState::Loading;
            self.publish(&state);
            state.generation
        };
        tracing::info!("Starting favorites sync for {}", user_id);

        let engine = self.clone();
        let user_id = user_id.to_string();
        let task = tokio::spawn(async move { engine.run(generation, user_id).await });

        let mut state = self.lock();
        if state.generation == generation {
            state.task = Some(task);
        } else {
            task.abort();
        }
    }

    /// Ends the current session: cancels the subscription and discards the
    /// in-memory set. The local cache is left untouched.
    pub fn stop(&self) {
        let (subscription, task) = {
            let mut state = self.lock();
            if let Some(user_id) = &state.user_id {
                tracing::info!("Stopping favorites sync for {}", user_id);
            }
            state.reset()
        };

        if let Some(subscription) = subscription {
            subscription.cancel();
        }
        if let Some(task) = task {
            task.abort();
        }
    }

    pub async fn add(&self, id: &str) {
        self.mutate(id, Mutation::Add).await;
    }

    pub async fn remove(&self, id: &str) {
        self.mutate(id, Mutation::Remove).await;
    }

    pub fn user_id(&self) -> Option<String> {
        self.lock().user_id.clone()
    }

    pub fn favorites(&self) -> FavoriteSet {
        self.lock().favorites.clone()
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.lock().favorites.contains(id)
    }

    pub fn status(&self) -> SyncState {
        self.lock().status.clone()
    }

    /// True while local ids are waiting to be merged into the remote document.
    pub fn has_pending_merge(&self) -> bool {
        self.lock().pending_merge
    }

    pub fn snapshot(&self) -> FavoritesSnapshot {
        self.lock().snapshot()
    }

    /// Receives a snapshot after every change of the active session.
    pub fn subscribe(&self) -> watch::Receiver<FavoritesSnapshot> {
        self.shared.updates.subscribe()
    }

    pub(crate) fn updates(&self) -> Arc<watch::Sender<FavoritesSnapshot>> {
        self.shared.updates.clone()
    }

    async fn run(self, generation: u64, user_id: String) {
        self.initialize(generation, &user_id).await;

        let subscription = match self.remote.subscribe(&user_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.apply_error(generation, e);
                return;
            }
        };

        let (mut events, handle) = subscription.into_parts();
        {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.subscription = Some(handle);
        }
        tracing::debug!("Subscribed to favorites of {}", user_id);

        while let Some(event) = events.recv().await {
            let current = match event {
                RemoteEvent::Snapshot(favorites) => {
                    self.apply_snapshot(generation, &user_id, favorites).await
                }
                RemoteEvent::Error(error) => self.apply_error(generation, error),
            };
            if !current {
                break;
            }
        }
    }

    /// Merges the local cache into the remote document, creating it if absent.
    async fn initialize(&self, generation: u64, user_id: &str) {
        let _writes = self.shared.writes.lock().await;
        let local = self.cache.all();
        let result = if local.is_empty() {
            self.remote.ensure_document(user_id).await
        } else {
            tracing::info!("Merging {} local favorites into {}", local.len(), user_id);
            self.remote.merge_favorites(user_id, &local).await
        };
        self.finish_merge(generation, &local, result);
    }

    fn finish_merge(
        &self,
        generation: u64,
        local: &FavoriteSet,
        result: Result<(), RemoteError>,
    ) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }

        match result {
            Ok(()) => {
                if !local.is_empty() {
                    self.cache.clear_merged(local);
                    tracing::info!("Merged {} local favorites", local.len());
                }
                state.pending_merge = false;
            }
            Err(e) if e.is_unavailable() => {
                tracing::warn!("Favorites store unavailable, keeping local favorites: {}", e);
                state.pending_merge = !local.is_empty();
                state.favorites.union(local);
                state.status = SyncState::Offline;
            }
            Err(e) => {
                tracing::warn!("Failed to merge local favorites: {}", e);
                state.pending_merge = false;
                state.status = SyncState::Error(e.to_string());
            }
        }

        self.publish(&state);
        true
    }

    /// Replaces the in-memory set with a pushed snapshot. Returns false once
    /// the session is gone.
    async fn apply_snapshot(&self, generation: u64, user_id: &str, favorites: FavoriteSet) -> bool {
        let retry_merge = {
            let mut state = self.lock();
            if state.generation != generation {
                return false;
            }

            let mut favorites = favorites;
            if state.pending_merge {
                favorites.union(&self.cache.all());
            }
            tracing::debug!("Favorites push for {}: {} ids", user_id, favorites.len());

            state.favorites = favorites;
            state.status = SyncState::Synced;
            state.pushes += 1;
            self.publish(&state);
            state.pending_merge
        };

        if !retry_merge {
            return true;
        }

        let _writes = self.shared.writes.lock().await;
        let local = self.cache.all();
        if local.is_empty() {
            return self.finish_merge(generation, &local, Ok(()));
        }
        let result = self.remote.merge_favorites(user_id, &local).await;
        self.finish_merge(generation, &local, result)
    }

    /// Records a subscription error. The last known set stays visible.
    fn apply_error(&self, generation: u64, error: RemoteError) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }

        tracing::warn!("Favorites subscription error: {}", error);
        state.status = if error.is_unavailable() {
            SyncState::Offline
        } else {
            SyncState::Error(error.to_string())
        };
        self.publish(&state);
        true
    }

    async fn mutate(&self, id: &str, mutation: Mutation) {
        let (generation, pushes, user_id, changed, uncached) = {
            let mut state = self.lock();
            let Some(user_id) = state.user_id.clone() else {
                tracing::warn!("Ignoring favorites change without a signed-in user");
                return;
            };
            let changed = match mutation {
                Mutation::Add => state.favorites.insert(id),
                Mutation::Remove => state.favorites.remove(id),
            };
            // An unmerged id must not be merged back after its removal
            let uncached = mutation == Mutation::Remove && self.cache.has(id);
            if uncached {
                self.cache.remove(id);
            }
            self.publish(&state);
            (state.generation, state.pushes, user_id, changed, uncached)
        };

        let result = {
            let _writes = self.shared.writes.lock().await;
            match mutation {
                Mutation::Add => self.remote.add_favorite(&user_id, id).await,
                Mutation::Remove => self.remote.remove_favorite(&user_id, id).await,
            }
        };

        if uncached && result.as_ref().is_err_and(|e| !e.is_unavailable()) {
            self.cache.add(id);
        }

        let mut state = self.lock();
        if state.generation != generation {
            return;
        }

        match result {
            Ok(()) => {
                if !matches!(state.status, SyncState::Error(_)) {
                    return;
                }
                state.status = SyncState::Synced;
            }
            Err(e) if e.is_unavailable() => {
                tracing::warn!("Favorites store unavailable, saving {} locally", id);
                if mutation == Mutation::Add {
                    self.cache.add(id);
                    state.pending_merge = true;
                }
                state.status = SyncState::Offline;
            }
            Err(e) => {
                tracing::warn!("Failed to update favorite {}: {}", id, e);
                // A push during the call already carries the remote state of `id`
                if changed && state.pushes == pushes {
                    match mutation {
                        Mutation::Add => state.favorites.remove(id),
                        Mutation::Remove => state.favorites.insert(id),
                    };
                }
                state.status = SyncState::Error(e.to_string());
            }
        }
        self.publish(&state);
    }

    fn publish(&self, state: &EngineState) {
        if state.user_id.is_some() {
            self.shared.updates.send_replace(state.snapshot());
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, Subscription};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Store whose adds are applied by another device first, then rejected.
    struct ContestedStore {
        inner: MemoryRemoteStore,
    }

    #[async_trait]
    impl RemoteFavoritesStore for ContestedStore {
        async fn ensure_document(&self, user_id: &str) -> Result<(), RemoteError> {
            self.inner.ensure_document(user_id).await
        }

        async fn read_favorites(&self, user_id: &str) -> Result<FavoriteSet, RemoteError> {
            self.inner.read_favorites(user_id).await
        }

        async fn add_favorite(&self, user_id: &str, id: &str) -> Result<(), RemoteError> {
            self.inner.add_favorite(user_id, id).await?;
            // Let the push reach the engine before answering
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(RemoteError::PermissionDenied("read-only replica".to_string()))
        }

        async fn remove_favorite(&self, user_id: &str, id: &str) -> Result<(), RemoteError> {
            self.inner.remove_favorite(user_id, id).await
        }

        async fn subscribe(&self, user_id: &str) -> Result<Subscription, RemoteError> {
            self.inner.subscribe(user_id).await
        }
    }

    fn set(ids: &[&str]) -> FavoriteSet {
        ids.iter().copied().collect()
    }

    fn setup() -> (ReconciliationEngine, MemoryRemoteStore, Arc<LocalFavoritesCache>) {
        let remote = MemoryRemoteStore::new();
        let cache = Arc::new(LocalFavoritesCache::in_memory());
        let engine = ReconciliationEngine::new(Arc::new(remote.clone()), cache.clone());
        (engine, remote, cache)
    }

    async fn wait_for(
        engine: &ReconciliationEngine,
        mut predicate: impl FnMut(&FavoritesSnapshot) -> bool,
    ) -> FavoritesSnapshot {
        let mut updates = engine.subscribe();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(2),
            updates.wait_for(|snapshot| predicate(snapshot)),
        )
        .await
        .expect("timed out waiting for favorites")
        .expect("updates channel closed")
        .clone();
        snapshot
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    async fn synced(engine: &ReconciliationEngine) -> FavoritesSnapshot {
        wait_for(engine, |snapshot| snapshot.status == SyncState::Synced).await
    }

    #[tokio::test]
    async fn test_sign_in_merges_local_into_remote() {
        let (engine, remote, cache) = setup();
        remote.insert_document("alice", ["7"]);
        cache.add("3");
        cache.add("7");

        engine.start("alice");
        let snapshot = synced(&engine).await;

        assert_eq!(snapshot.session, Session::Authenticated("alice".into()));
        assert_eq!(snapshot.favorites, set(&["3", "7"]));
        assert!(remote
            .document("alice")
            .unwrap()
            .favorites
            .is_superset(&set(&["3", "7"])));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_missing_document_is_created() {
        let (engine, remote, _cache) = setup();

        engine.start("alice");
        let snapshot = synced(&engine).await;

        assert!(snapshot.favorites.is_empty());
        assert!(remote.document("alice").is_some());
    }

    #[tokio::test]
    async fn test_push_replaces_set() {
        let (engine, remote, _cache) = setup();
        remote.insert_document("alice", ["1"]);
        engine.start("alice");
        synced(&engine).await;

        // Another device adds a favorite
        remote.add_favorite("alice", "9").await.unwrap();

        let snapshot = wait_for(&engine, |snapshot| snapshot.favorites.contains("9")).await;
        assert_eq!(snapshot.favorites, set(&["1", "9"]));
    }

    #[tokio::test]
    async fn test_subscription_error_preserves_set() {
        let (engine, remote, _cache) = setup();
        remote.insert_document("alice", ["1", "2"]);
        engine.start("alice");
        synced(&engine).await;

        remote.set_online(false);
        let snapshot = wait_for(&engine, |snapshot| snapshot.status == SyncState::Offline).await;

        assert_eq!(snapshot.favorites, set(&["1", "2"]));
        assert_eq!(engine.favorites(), set(&["1", "2"]));
    }

    #[tokio::test]
    async fn test_interrupted_subscription_recovers() {
        let (engine, remote, _cache) = setup();
        remote.insert_document("alice", ["1"]);
        engine.start("alice");
        synced(&engine).await;

        remote.interrupt("alice");
        wait_for(&engine, |snapshot| snapshot.status == SyncState::Offline).await;

        remote.add_favorite("alice", "2").await.unwrap();
        let snapshot = synced(&engine).await;
        assert_eq!(snapshot.favorites, set(&["1", "2"]));
    }

    #[tokio::test]
    async fn test_offline_add_falls_back_to_cache() {
        let (engine, remote, cache) = setup();
        engine.start("alice");
        synced(&engine).await;
        remote.set_online(false);

        engine.add("5").await;

        assert!(engine.is_favorite("5"));
        assert!(cache.has("5"));
        assert_eq!(engine.status(), SyncState::Offline);
        assert!(engine.has_pending_merge());
    }

    #[tokio::test]
    async fn test_denied_add_rolls_back() {
        let (engine, remote, cache) = setup();
        engine.start("alice");
        synced(&engine).await;
        remote.deny_user("alice");

        engine.add("5").await;

        assert!(!engine.is_favorite("5"));
        assert!(!cache.has("5"));
        let status = engine.status();
        assert!(status.error_message().unwrap().contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_denied_remove_restores_id() {
        let (engine, remote, _cache) = setup();
        remote.insert_document("alice", ["4"]);
        engine.start("alice");
        synced(&engine).await;
        remote.deny_user("alice");

        engine.remove("4").await;

        assert!(engine.is_favorite("4"));
        assert!(matches!(engine.status(), SyncState::Error(_)));
    }

    #[tokio::test]
    async fn test_success_after_error_is_synced() {
        let (engine, remote, _cache) = setup();
        engine.start("alice");
        synced(&engine).await;

        remote.deny_user("alice");
        engine.add("5").await;
        assert!(matches!(engine.status(), SyncState::Error(_)));

        remote.allow_user("alice");
        engine.add("6").await;
        assert_eq!(engine.status(), SyncState::Synced);
        assert!(engine.is_favorite("6"));
    }

    #[tokio::test]
    async fn test_offline_sign_in_serves_cache_then_merges() {
        let (engine, remote, cache) = setup();
        remote.set_online(false);
        cache.add("3");

        engine.start("alice");
        let snapshot = wait_for(&engine, |snapshot| snapshot.status == SyncState::Offline).await;
        assert!(snapshot.favorites.contains("3"));
        assert!(cache.has("3"));
        assert!(engine.has_pending_merge());

        remote.set_online(true);
        eventually(|| !engine.has_pending_merge()).await;

        assert!(cache.is_empty());
        assert!(remote.document("alice").unwrap().favorites.contains("3"));
        assert!(engine.is_favorite("3"));
    }

    #[tokio::test]
    async fn test_offline_add_reaches_remote_after_reconnect() {
        let (engine, remote, cache) = setup();
        engine.start("alice");
        synced(&engine).await;

        remote.set_online(false);
        engine.add("8").await;
        assert!(cache.has("8"));

        remote.set_online(true);
        eventually(|| cache.is_empty()).await;
        assert!(remote.document("alice").unwrap().favorites.contains("8"));
    }

    #[tokio::test]
    async fn test_stop_cancels_subscription() {
        let (engine, remote, cache) = setup();
        cache.add("1");
        engine.start("alice");
        synced(&engine).await;
        assert_eq!(remote.subscriber_count("alice"), 1);

        engine.stop();

        assert_eq!(remote.subscriber_count("alice"), 0);
        assert_eq!(engine.user_id(), None);
        assert_eq!(engine.status(), SyncState::Idle);
        assert!(engine.favorites().is_empty());
    }

    #[tokio::test]
    async fn test_switching_users_ignores_previous_stream() {
        let (engine, remote, _cache) = setup();
        remote.insert_document("alice", ["a1"]);
        remote.insert_document("bob", ["b1"]);

        engine.start("alice");
        synced(&engine).await;

        engine.start("bob");
        assert_eq!(remote.subscriber_count("alice"), 0);
        let snapshot = wait_for(&engine, |snapshot| {
            snapshot.session == Session::Authenticated("bob".into())
                && snapshot.status == SyncState::Synced
        })
        .await;
        assert_eq!(snapshot.favorites, set(&["b1"]));

        remote.add_favorite("alice", "a2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(engine.user_id().as_deref(), Some("bob"));
        assert_eq!(engine.favorites(), set(&["b1"]));
    }

    #[tokio::test]
    async fn test_mutation_without_session_is_ignored() {
        let (engine, remote, cache) = setup();

        engine.add("1").await;

        assert!(engine.favorites().is_empty());
        assert!(cache.is_empty());
        assert!(remote.document("alice").is_none());
    }

    #[tokio::test]
    async fn test_denied_sign_in_reports_error() {
        let (engine, remote, cache) = setup();
        remote.deny_user("alice");
        cache.add("2");

        engine.start("alice");
        let snapshot = wait_for(&engine, |snapshot| {
            matches!(snapshot.status, SyncState::Error(_))
        })
        .await;

        assert!(snapshot.favorites.contains("2"));
        assert!(cache.has("2"));
    }

    #[tokio::test]
    async fn test_remove_during_pending_merge_stays_removed() {
        let (engine, remote, cache) = setup();
        remote.set_online(false);
        cache.add("3");
        cache.add("4");

        engine.start("alice");
        wait_for(&engine, |snapshot| snapshot.status == SyncState::Offline).await;
        assert!(engine.has_pending_merge());

        remote.set_online(true);
        engine.remove("3").await;
        assert!(!engine.is_favorite("3"));
        assert!(!cache.has("3"));

        eventually(|| !engine.has_pending_merge()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(engine.favorites(), set(&["4"]));
        assert_eq!(remote.document("alice").unwrap().favorites, set(&["4"]));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_add_during_pending_merge_reaches_remote() {
        let (engine, remote, cache) = setup();
        remote.set_online(false);
        cache.add("3");

        engine.start("alice");
        wait_for(&engine, |snapshot| snapshot.status == SyncState::Offline).await;
        assert!(engine.has_pending_merge());

        remote.set_online(true);
        engine.add("4").await;

        eventually(|| !engine.has_pending_merge()).await;
        let snapshot = wait_for(&engine, |snapshot| snapshot.favorites == set(&["3", "4"])).await;

        assert_eq!(snapshot.status, SyncState::Synced);
        assert_eq!(remote.document("alice").unwrap().favorites, set(&["3", "4"]));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_denied_remove_keeps_unmerged_id_cached() {
        let (engine, remote, cache) = setup();
        remote.deny_user("alice");
        cache.add("2");
        engine.start("alice");
        wait_for(&engine, |snapshot| matches!(snapshot.status, SyncState::Error(_))).await;

        engine.remove("2").await;

        assert!(engine.is_favorite("2"));
        assert!(cache.has("2"));
    }

    #[tokio::test]
    async fn test_failed_add_keeps_state_from_newer_push() {
        let remote = MemoryRemoteStore::new();
        let cache = Arc::new(LocalFavoritesCache::in_memory());
        let store = ContestedStore {
            inner: remote.clone(),
        };
        let engine = ReconciliationEngine::new(Arc::new(store), cache);
        engine.start("alice");
        synced(&engine).await;

        engine.add("5").await;

        assert!(engine.is_favorite("5"));
        assert!(remote.document("alice").unwrap().favorites.contains("5"));
        assert!(matches!(engine.status(), SyncState::Error(_)));
    }
}
