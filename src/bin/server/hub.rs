//! Fan-out of document changes to subscribed clients.

use std::collections::HashMap;

use desertzen_core::FavoritesDocument;
use tokio::sync::{broadcast, RwLock};

/// Tracks subscribers per user for broadcasting document changes.
pub struct FavoritesHub {
    /// Broadcast channels keyed by user ID
    channels: RwLock<HashMap<String, broadcast::Sender<FavoritesDocument>>>,
}

impl FavoritesHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribes to changes of a user's document.
    pub async fn subscribe(&self, user_id: &str) -> broadcast::Receiver<FavoritesDocument> {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(user_id) {
            sender.subscribe()
        } else {
            // Create new channel with buffer of 16 messages
            let (sender, receiver) = broadcast::channel(16);
            channels.insert(user_id.to_string(), sender);
            receiver
        }
    }

    /// Sends the new document to every subscriber of its user.
    pub async fn broadcast(&self, document: &FavoritesDocument) {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(&document.user_id) {
            if sender.send(document.clone()).is_err() {
                // Last subscriber is gone
                channels.remove(&document.user_id);
            }
        }
    }

    /// Number of users with at least one channel open.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for FavoritesHub {
    fn default() -> Self {
        Self::new()
    }
}
