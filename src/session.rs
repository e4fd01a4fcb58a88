//! Persisted sign-in state of the CLI.
//!
//! The signed-in user id is stored as plain text in `<data_dir>/session`.
//! A missing or empty file means the session is anonymous.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use desertzen_core::Session;

const SESSION_FILE: &str = "session";

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Session, SessionError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let user_id = contents.trim();
                if user_id.is_empty() {
                    Ok(Session::Anonymous)
                } else {
                    Ok(Session::Authenticated(user_id.to_string()))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Session::Anonymous),
            Err(e) => Err(SessionError(self.path.clone(), e)),
        }
    }

    pub fn save(&self, user_id: &str) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SessionError(parent.to_path_buf(), e))?;
        }
        fs::write(&self.path, format!("{}\n", user_id))
            .map_err(|e| SessionError(self.path.clone(), e))
    }

    /// Signs out. Succeeds if no one was signed in.
    pub fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError(self.path.clone(), e)),
        }
    }
}

/// I/O error reading or writing the session file.
#[derive(Debug)]
pub struct SessionError(PathBuf, io::Error);

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session file {}: {}", self.0.display(), self.1)
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_anonymous() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path());
        assert_eq!(store.load().unwrap(), Session::Anonymous);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path().join("nested"));

        store.save("alice").unwrap();

        assert_eq!(
            store.load().unwrap(),
            Session::Authenticated("alice".to_string())
        );
    }

    #[test]
    fn test_clear_signs_out() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path());
        store.save("alice").unwrap();

        store.clear().unwrap();
        store.clear().unwrap();

        assert_eq!(store.load().unwrap(), Session::Anonymous);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_blank_file_is_anonymous() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path());
        fs::write(store.path(), "  \n").unwrap();

        assert_eq!(store.load().unwrap(), Session::Anonymous);
    }
}
