//! Favorite id set.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// A set of favorite meditation ids.
///
/// Membership and equality ignore order. Iteration follows insertion order,
/// which is also the order ids are persisted in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FavoriteSet {
    ids: IndexSet<String>,
}

impl FavoriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an id. Returns false if it was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    /// Removes an id, keeping the order of the remaining ids.
    /// Returns false if it was not present.
    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.shift_remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Adds every id of `other`. Returns true if anything was added.
    pub fn union(&mut self, other: &FavoriteSet) -> bool {
        let before = self.ids.len();
        self.ids.extend(other.ids.iter().cloned());
        self.ids.len() != before
    }

    /// Removes every id of `other`. Returns true if anything was removed.
    pub fn subtract(&mut self, other: &FavoriteSet) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| !other.contains(id));
        self.ids.len() != before
    }

    pub fn is_superset(&self, other: &FavoriteSet) -> bool {
        other.iter().all(|id| self.contains(id))
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for FavoriteSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl IntoIterator for FavoriteSet {
    type Item = String;
    type IntoIter = indexmap::set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}
