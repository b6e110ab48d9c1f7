//! Unified error handling with Sentry integration.
//!
//! Containers return their own error types; [`GuideError`] unifies them for
//! front ends, which call [`GuideError::report`] before showing
//! [`GuideError::user_message`].

use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::geo::LocationError;
use crate::interactions::InteractionError;
use crate::session::AuthError;
use crate::storage::StorageError;

/// Failure writing to or reading from a backend table.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The write collides with an existing row.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The row does not exist (or is not the caller's).
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation needs a signed-in user.
    #[error("not signed in")]
    NotSignedIn,

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(#[source] BackendError),
}

impl From<BackendError> for PersistenceError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Conflict(message) => Self::Conflict(message),
            BackendError::NotFound(message) => Self::NotFound(message),
            BackendError::NotSignedIn | BackendError::Unauthorized => Self::NotSignedIn,
            other => Self::Backend(other),
        }
    }
}

/// Application-level error type for the guide.
#[derive(Debug, Error)]
pub enum GuideError {
    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Authentication operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Position or place name could not be determined.
    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    /// Rating or comment operation failed.
    #[error("Interaction error: {0}")]
    Interaction(#[from] InteractionError),

    /// Table read or write failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Backend call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Local storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input from the user.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl GuideError {
    /// Whether this is our fault rather than the user's.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        match self {
            Self::Backend(_) | Self::Storage(_) | Self::Persistence(PersistenceError::Backend(_)) => {
                true
            }
            Self::Auth(err) => err.is_internal(),
            Self::Interaction(InteractionError::Persistence(PersistenceError::Backend(_))) => true,
            _ => false,
        }
    }

    /// Capture internal errors to Sentry and log them.
    pub fn report(&self) {
        if self.is_internal() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Operation error"
            );
        } else {
            tracing::debug!(error = %self, "Operation rejected");
        }
    }

    /// Message safe to show the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Backend(_) | Self::Storage(_) | Self::Persistence(PersistenceError::Backend(_)) => {
                "Something went wrong, please try again".to_string()
            }
            Self::Auth(err) => err.user_message(),
            Self::Persistence(PersistenceError::NotSignedIn) => {
                "Please sign in to continue".to_string()
            }
            Self::Location(LocationError::PermissionDenied) => "Location access denied".to_string(),
            Self::Location(LocationError::Lookup(_)) => "Location unavailable".to_string(),
            Self::Interaction(err) => err.user_message(),
            _ => self.to_string(),
        }
    }
}

/// Result type alias for `GuideError`.
pub type Result<T> = std::result::Result<T, GuideError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("interaction", "Rated destination", Some(&[("destination", "medina")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
