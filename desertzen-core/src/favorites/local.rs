//! Local favorites cache persisted to disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::FavoriteSet;

/// Name of the persisted key holding the local favorites.
pub const STORAGE_KEY: &str = "favorites-storage";

/// Device-local favorites, usable without network or login.
///
/// Every operation is synchronous and idempotent. Mutations are written
/// through to `<data_dir>/favorites-storage.json`; the file is only created
/// on the first change. A failed write is logged and the in-memory set stays
/// authoritative.
#[derive(Debug)]
pub struct LocalFavoritesCache {
    path: Option<PathBuf>,
    favorites: Mutex<FavoriteSet>,
}

impl LocalFavoritesCache {
    /// Opens the cache stored in `data_dir`.
    ///
    /// A missing file is an empty cache. An unreadable or corrupt file is an error.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = data_dir.as_ref().join(format!("{}.json", STORAGE_KEY));
        let favorites = Self::load(&path)?;

        Ok(Self {
            path: Some(path),
            favorites: Mutex::new(favorites),
        })
    }

    /// Creates a cache with no backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            favorites: Mutex::new(FavoriteSet::new()),
        }
    }

    /// Returns the backing file path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn add(&self, id: &str) {
        let mut favorites = self.lock();
        if favorites.insert(id) {
            self.persist(&favorites);
        }
    }

    pub fn remove(&self, id: &str) {
        let mut favorites = self.lock();
        if favorites.remove(id) {
            self.persist(&favorites);
        }
    }

    pub fn has(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn all(&self) -> FavoriteSet {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Empties the cache.
    pub fn clear(&self) {
        let mut favorites = self.lock();
        if !favorites.is_empty() {
            *favorites = FavoriteSet::new();
            self.persist(&favorites);
        }
    }

    /// Drops the ids that were merged into the remote store.
    ///
    /// Equivalent to [`clear`](Self::clear) unless ids were added after the
    /// merge started; those are kept for the next merge.
    pub fn clear_merged(&self, merged: &FavoriteSet) {
        let mut favorites = self.lock();
        if favorites.subtract(merged) {
            self.persist(&favorites);
        }
    }

    fn lock(&self) -> MutexGuard<'_, FavoriteSet> {
        self.favorites.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(path: &Path) -> Result<FavoriteSet, StorageError> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::ParseError(path.to_path_buf(), e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FavoriteSet::new()),
            Err(e) => Err(StorageError::IoError(path.to_path_buf(), e)),
        }
    }

    fn persist(&self, favorites: &FavoriteSet) {
        let Some(path) = &self.path else {
            return;
        };

        if let Err(e) = write_json(path, favorites) {
            tracing::warn!("Failed to persist local favorites: {}", e);
        }
    }
}

/// Writes atomically using temp file + rename.
fn write_json(path: &Path, favorites: &FavoriteSet) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::IoError(parent.to_path_buf(), e))?;
    }

    let bytes = serde_json::to_vec(favorites)
        .map_err(|e| StorageError::ParseError(path.to_path_buf(), e))?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, bytes).map_err(|e| StorageError::IoError(temp_path.clone(), e))?;
    fs::rename(&temp_path, path).map_err(|e| StorageError::IoError(path.to_path_buf(), e))?;

    Ok(())
}

/// Errors that can occur while loading or saving the local cache.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error reading or writing the cache file.
    IoError(PathBuf, io::Error),
    /// The cache file is not a JSON array of ids.
    ParseError(PathBuf, serde_json::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            StorageError::ParseError(path, e) => {
                write!(f, "Failed to parse favorites {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::IoError(_, e) => Some(e),
            StorageError::ParseError(_, e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_cache() -> (LocalFavoritesCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = LocalFavoritesCache::open(temp_dir.path()).unwrap();
        (cache, temp_dir)
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let (cache, _temp) = test_cache();
        assert!(cache.is_empty());
        assert!(!cache.path().unwrap().exists());
    }

    #[test]
    fn test_file_created_on_first_change() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested").join("data");
        let cache = LocalFavoritesCache::open(&nested).unwrap();

        cache.add("1");

        assert!(nested.join("favorites-storage.json").exists());
    }

    #[test]
    fn test_has_reflects_net_effect() {
        let (cache, _temp) = test_cache();

        cache.add("1");
        cache.add("1");
        cache.add("2");
        cache.remove("1");
        cache.remove("1");
        cache.remove("9");
        cache.add("3");

        assert!(!cache.has("1"));
        assert!(cache.has("2"));
        assert!(cache.has("3"));
        assert!(!cache.has("9"));
        assert_eq!(cache.all().len(), 2);
    }

    #[test]
    fn test_reload_yields_identical_set() {
        let temp_dir = TempDir::new().unwrap();

        let cache = LocalFavoritesCache::open(temp_dir.path()).unwrap();
        cache.add("3");
        cache.add("7");
        cache.add("1");
        cache.remove("7");
        let before = cache.all();
        drop(cache);

        let reloaded = LocalFavoritesCache::open(temp_dir.path()).unwrap();
        assert_eq!(reloaded.all(), before);
        assert_eq!(reloaded.all().to_vec(), vec!["3", "1"]);
    }

    #[test]
    fn test_persisted_value_is_json_array() {
        let (cache, _temp) = test_cache();
        cache.add("5");

        let contents = fs::read_to_string(cache.path().unwrap()).unwrap();
        assert_eq!(contents, r#"["5"]"#);
    }

    #[test]
    fn test_clear_empties_and_persists() {
        let temp_dir = TempDir::new().unwrap();
        let cache = LocalFavoritesCache::open(temp_dir.path()).unwrap();
        cache.add("1");
        cache.add("2");

        cache.clear();
        assert!(cache.is_empty());

        let reloaded = LocalFavoritesCache::open(temp_dir.path()).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_clear_merged_keeps_later_additions() {
        let (cache, _temp) = test_cache();
        cache.add("3");
        cache.add("7");
        let merged = cache.all();

        cache.add("9");
        cache.clear_merged(&merged);

        assert_eq!(cache.all().to_vec(), vec!["9"]);
    }

    #[test]
    fn test_clear_merged_of_everything_clears() {
        let (cache, _temp) = test_cache();
        cache.add("3");
        cache.add("7");

        cache.clear_merged(&cache.all());

        assert!(cache.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("favorites-storage.json"), "{not json").unwrap();

        let err = LocalFavoritesCache::open(temp_dir.path()).unwrap_err();
        assert!(matches!(err, StorageError::ParseError(_, _)));
        assert!(err.to_string().contains("Failed to parse favorites"));
    }

    #[test]
    fn test_in_memory_has_no_path() {
        let cache = LocalFavoritesCache::in_memory();
        cache.add("1");
        assert!(cache.path().is_none());
        assert!(cache.has("1"));
    }
}
