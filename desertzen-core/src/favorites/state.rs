//! Session and sync status types.

use std::fmt;

use super::FavoriteSet;

/// Who the favorites belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Session {
    #[default]
    Anonymous,
    Authenticated(String),
}

impl Session {
    /// Builds a session from a session-changed event payload.
    pub fn from_user(user_id: Option<String>) -> Self {
        match user_id {
            Some(user_id) => Session::Authenticated(user_id),
            None => Session::Anonymous,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Session::Anonymous => None,
            Session::Authenticated(user_id) => Some(user_id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Session::Authenticated(_))
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Session::Anonymous => write!(f, "anonymous"),
            Session::Authenticated(user_id) => write!(f, "{}", user_id),
        }
    }
}

/// Synchronization status of the favorites shown to the user.
///
/// `Offline` and `Error` never imply an empty favorite set: the last known
/// set stays visible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    Idle,
    Loading,
    Synced,
    Offline,
    Error(String),
}

impl SyncState {
    pub fn is_loading(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Loading)
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, SyncState::Offline)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            SyncState::Error(message) => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Loading => write!(f, "loading"),
            SyncState::Synced => write!(f, "synced"),
            SyncState::Offline => write!(f, "offline"),
            SyncState::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// Everything a UI needs to render the favorites list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FavoritesSnapshot {
    pub session: Session,
    pub favorites: FavoriteSet,
    pub status: SyncState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_from_user() {
        assert_eq!(Session::from_user(None), Session::Anonymous);
        assert_eq!(
            Session::from_user(Some("alice".to_string())),
            Session::Authenticated("alice".to_string())
        );
        assert_eq!(Session::Authenticated("alice".into()).user_id(), Some("alice"));
        assert!(!Session::Anonymous.is_authenticated());
    }

    #[test]
    fn test_sync_state_display() {
        assert_eq!(SyncState::Synced.to_string(), "synced");
        assert_eq!(SyncState::Offline.to_string(), "offline");
        assert_eq!(
            SyncState::Error("Permission denied".into()).to_string(),
            "error: Permission denied"
        );
    }

    #[test]
    fn test_sync_state_helpers() {
        assert!(SyncState::Loading.is_loading());
        assert!(SyncState::Offline.is_offline());
        assert_eq!(SyncState::Error("boom".into()).error_message(), Some("boom"));
        assert_eq!(SyncState::Synced.error_message(), None);
    }
}
