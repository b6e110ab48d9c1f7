//! Authentication error types.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors that can occur during authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] tuni_core::EmailError),

    /// Password too weak or invalid.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    /// Username missing or unusable.
    #[error("invalid username: {0}")]
    InvalidUsername(String),

    /// Wrong email or password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// An account already uses this email.
    #[error("user already exists")]
    UserAlreadyExists,

    /// The operation needs a signed-in user.
    #[error("not signed in")]
    NotSignedIn,

    /// The backend could not be reached.
    #[error("network error: {0}")]
    Network(#[source] BackendError),

    /// The account was created but its profile could not be.
    #[error("profile error: {0}")]
    Profile(#[source] BackendError),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(#[source] BackendError),
}

impl AuthError {
    /// Whether this is our fault rather than the user's.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Profile(_) | Self::Backend(_))
    }

    /// Message safe to show the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidEmail(_) => "Invalid email address".to_string(),
            Self::WeakPassword(msg) | Self::InvalidUsername(msg) => msg.clone(),
            Self::InvalidCredentials => "Invalid credentials".to_string(),
            Self::UserAlreadyExists => "An account with this email already exists".to_string(),
            Self::NotSignedIn => "Please sign in to continue".to_string(),
            Self::Network(_) => "Could not reach the server, please try again".to_string(),
            // Client errors carry the auth server's explanation ("Email not confirmed")
            Self::Backend(BackendError::Api { status, message }) if *status < 500 => {
                message.clone()
            }
            Self::Profile(_) | Self::Backend(_) => "Authentication error".to_string(),
        }
    }
}

impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidCredentials => Self::InvalidCredentials,
            BackendError::Conflict(_) => Self::UserAlreadyExists,
            BackendError::NotSignedIn | BackendError::Unauthorized => Self::NotSignedIn,
            other if other.is_transient() => Self::Network(other),
            other => Self::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_backend_error() {
        assert!(matches!(
            AuthError::from(BackendError::InvalidCredentials),
            AuthError::InvalidCredentials
        ));
        assert!(matches!(
            AuthError::from(BackendError::Conflict("User already registered".to_string())),
            AuthError::UserAlreadyExists
        ));
        assert!(matches!(
            AuthError::from(BackendError::Api {
                status: 503,
                message: "down".to_string()
            }),
            AuthError::Network(_)
        ));
        assert!(matches!(
            AuthError::from(BackendError::Api {
                status: 400,
                message: "Email not confirmed".to_string()
            }),
            AuthError::Backend(_)
        ));
    }

    #[test]
    fn test_user_message() {
        assert_eq!(
            AuthError::WeakPassword("password must be at least 8 characters".to_string())
                .user_message(),
            "password must be at least 8 characters"
        );
        assert_eq!(AuthError::InvalidCredentials.user_message(), "Invalid credentials");
    }
}
