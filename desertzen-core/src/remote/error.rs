//! Remote store error types.

use thiserror::Error;

/// Errors reported by a remote favorites store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// No connectivity or the backend cannot be reached. Recoverable.
    #[error("You're offline. Changes will sync when you're back online. ({0})")]
    Unavailable(String),

    /// The caller may not access this document.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The favorites document does not exist yet.
    #[error("Favorites document not found")]
    NotFound,

    /// Any other backend failure.
    #[error("Remote store error: {0}")]
    Backend(String),
}

impl RemoteError {
    /// True for errors that should switch to offline mode instead of failing.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_unavailable() {
        assert!(RemoteError::Unavailable("timeout".into()).is_unavailable());
        assert!(!RemoteError::PermissionDenied("nope".into()).is_unavailable());
        assert!(!RemoteError::NotFound.is_unavailable());
        assert!(!RemoteError::Backend("boom".into()).is_unavailable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RemoteError::PermissionDenied("user bob".into()).to_string(),
            "Permission denied: user bob"
        );
        assert!(RemoteError::Unavailable("connection refused".into())
            .to_string()
            .starts_with("You're offline."));
    }
}
