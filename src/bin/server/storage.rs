//! Server-side favorites document storage.
//!
//! Stores one JSON document per user in the following structure:
//! ```text
//! <DATA_DIR>/
//!   userFavorites/
//!     <user_id>.json
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use desertzen_core::{FavoritesDocument, FAVORITES_COLLECTION};

/// Errors that can occur during server storage operations.
#[derive(Debug)]
pub enum ServerStorageError {
    /// I/O error reading or writing a file.
    IoError(PathBuf, io::Error),
    /// A stored document is not valid JSON.
    ParseError(PathBuf, serde_json::Error),
    /// Invalid user ID (e.g., contains path separators).
    InvalidUserId(String),
}

impl std::fmt::Display for ServerStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            ServerStorageError::ParseError(path, e) => {
                write!(f, "Failed to load document {}: {}", path.display(), e)
            }
            ServerStorageError::InvalidUserId(id) => {
                write!(f, "Invalid user ID: {}", id)
            }
        }
    }
}

impl std::error::Error for ServerStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerStorageError::IoError(_, e) => Some(e),
            ServerStorageError::ParseError(_, e) => Some(e),
            _ => None,
        }
    }
}

/// Result of a change to a document.
#[derive(Debug, Clone)]
pub struct Change {
    pub document: FavoritesDocument,
    /// False when the operation was a no-op and nothing was written.
    pub changed: bool,
}

/// Server-side storage for favorites documents.
///
/// Callers serialize writes; the handlers hold the storage behind a lock.
#[derive(Debug, Clone)]
pub struct ServerStorage {
    data_dir: PathBuf,
}

impl ServerStorage {
    /// Creates a new server storage instance.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Validates a user ID to prevent path traversal attacks.
    fn validate_user_id(user_id: &str) -> Result<(), ServerStorageError> {
        if user_id.is_empty()
            || user_id.contains('/')
            || user_id.contains('\\')
            || user_id.contains("..")
            || user_id.starts_with('.')
        {
            return Err(ServerStorageError::InvalidUserId(user_id.to_string()));
        }
        Ok(())
    }

    fn collection_dir(&self) -> PathBuf {
        self.data_dir.join(FAVORITES_COLLECTION)
    }

    fn doc_path(&self, user_id: &str) -> PathBuf {
        self.collection_dir().join(format!("{}.json", user_id))
    }

    /// Loads a user's document.
    ///
    /// Returns `Ok(None)` if the document doesn't exist yet.
    pub fn load(&self, user_id: &str) -> Result<Option<FavoritesDocument>, ServerStorageError> {
        Self::validate_user_id(user_id)?;

        let path = self.doc_path(user_id);

        match fs::read(&path) {
            Ok(bytes) => {
                let doc = serde_json::from_slice(&bytes)
                    .map_err(|e| ServerStorageError::ParseError(path, e))?;
                Ok(Some(doc))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServerStorageError::IoError(path, e)),
        }
    }

    /// Saves a document under its user ID.
    pub fn save(&self, doc: &FavoritesDocument) -> Result<(), ServerStorageError> {
        Self::validate_user_id(&doc.user_id)?;

        let dir = self.collection_dir();
        let path = self.doc_path(&doc.user_id);

        fs::create_dir_all(&dir).map_err(|e| ServerStorageError::IoError(dir.clone(), e))?;

        let bytes =
            serde_json::to_vec(doc).map_err(|e| ServerStorageError::ParseError(path.clone(), e))?;

        // Write atomically using temp file + rename
        let temp_path = path.with_extension("json.tmp");

        let mut file = File::create(&temp_path)
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;

        file.write_all(&bytes)
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;

        file.sync_all()
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;

        fs::rename(&temp_path, &path).map_err(|e| ServerStorageError::IoError(path, e))?;

        Ok(())
    }

    /// Returns the user's document, creating an empty one if absent.
    pub fn ensure(&self, user_id: &str) -> Result<Change, ServerStorageError> {
        match self.load(user_id)? {
            Some(document) => Ok(Change {
                document,
                changed: false,
            }),
            None => {
                let document = FavoritesDocument::new(user_id);
                self.save(&document)?;
                Ok(Change {
                    document,
                    changed: true,
                })
            }
        }
    }

    /// Unions `ids` into the user's document, creating it if absent.
    pub fn add(&self, user_id: &str, ids: &[String]) -> Result<Change, ServerStorageError> {
        let Change {
            mut document,
            changed: created,
        } = self.ensure(user_id)?;

        let added = document.add_all(ids.iter().map(String::as_str));
        if added {
            self.save(&document)?;
        }

        Ok(Change {
            document,
            changed: created || added,
        })
    }

    /// Removes `id` from the user's document. A missing document is created empty.
    pub fn remove(&self, user_id: &str, id: &str) -> Result<Change, ServerStorageError> {
        let Change {
            mut document,
            changed: created,
        } = self.ensure(user_id)?;

        let removed = document.remove(id);
        if removed {
            self.save(&document)?;
        }

        Ok(Change {
            document,
            changed: created || removed,
        })
    }
}
