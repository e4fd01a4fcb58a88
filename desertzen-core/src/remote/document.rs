//! Favorites document shape shared by the client and the document server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::favorites::FavoriteSet;

/// Logical collection holding favorites documents.
pub const FAVORITES_COLLECTION: &str = "userFavorites";

/// One user's favorites document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoritesDocument {
    pub user_id: String,
    pub favorites: FavoriteSet,
    pub updated_at: DateTime<Utc>,
}

impl FavoritesDocument {
    /// Creates an empty document.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            favorites: FavoriteSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Unions `ids` into the document. Returns true if anything was added.
    pub fn add_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> bool {
        let added = ids
            .into_iter()
            .fold(false, |added, id| self.favorites.insert(id) || added);
        self.updated_at = Utc::now();
        added
    }

    /// Removes `id` from the document. Returns true if it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.favorites.remove(id);
        self.updated_at = Utc::now();
        removed
    }
}

/// Body of `POST /favorites/{user_id}/items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemsRequest {
    pub ids: Vec<String>,
}
