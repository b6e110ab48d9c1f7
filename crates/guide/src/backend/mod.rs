//! Hosted backend access: authentication, tables and realtime changes.
//!
//! # Architecture
//!
//! - [`Backend`] is the seam every state container talks to
//! - [`SupabaseClient`] implements it over HTTP (auth + REST) and websocket (realtime)
//! - [`MemoryBackend`] implements it in-process for local development and tests
//!
//! As with the backend's official SDKs, the client owns the current session:
//! table calls are made as the signed-in user, and every session change is
//! announced on [`Backend::auth_events`].
//!
//! # Example
//!
//! ```rust,ignore
//! use tuni_guide::backend::{Backend, SupabaseClient};
//!
//! let client = SupabaseClient::connect(&config.backend, storage).await?;
//! let mut events = client.auth_events();
//! let session = client.sign_in_with_password(&email, "pw123456").await?;
//! ```

pub mod memory;
mod realtime;
mod supabase;
pub mod types;

pub use memory::MemoryBackend;
pub use realtime::RealtimeFeed;
pub use supabase::SupabaseClient;
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use tuni_core::{CommentId, DestinationId, Email, UserId};

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed (connection, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with an unexpected status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Response body could not be parsed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Email/password pair rejected.
    #[error("invalid login credentials")]
    InvalidCredentials,

    /// Uniqueness constraint violated (duplicate account, duplicate row).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Requested row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Token missing, expired or not allowed to touch the row.
    #[error("Unauthorized")]
    Unauthorized,

    /// The call needs a signed-in user and there is none.
    #[error("no signed-in user")]
    NotSignedIn,

    /// Rate limited by the backend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Realtime socket failure.
    #[error("Realtime error: {0}")]
    Realtime(String),
}

impl BackendError {
    /// Whether retrying later could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited(_) | Self::Realtime(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Operations the guide needs from its backend-as-a-service.
#[async_trait]
pub trait Backend: Send + Sync {
    // ── Auth ────────────────────────────────────────────────────────────────

    /// Subscribe to session changes.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    /// The session the client currently holds.
    async fn current_session(&self) -> Option<AuthSession>;

    /// Create an account; `username` is stored in the user metadata.
    async fn sign_up(
        &self,
        email: &Email,
        password: &str,
        username: &str,
    ) -> Result<SignUpOutcome, BackendError>;

    /// Sign in with email and password.
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &str,
    ) -> Result<AuthSession, BackendError>;

    /// Revoke the current session.
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Send a password-reset email linking to `redirect_to`.
    async fn reset_password_for_email(
        &self,
        email: &Email,
        redirect_to: &str,
    ) -> Result<(), BackendError>;

    /// Change the signed-in user's password.
    async fn update_password(&self, new_password: &str) -> Result<AuthUser, BackendError>;

    // ── Profiles ────────────────────────────────────────────────────────────

    /// Fetch the profile owned by `auth_id`, if any.
    async fn fetch_profile(&self, auth_id: UserId) -> Result<Option<ProfileRow>, BackendError>;

    /// Insert a profile; fails with `Conflict` if one exists.
    async fn insert_profile(&self, profile: &NewProfile) -> Result<ProfileRow, BackendError>;

    /// Update the profile owned by `auth_id`.
    async fn update_profile(
        &self,
        auth_id: UserId,
        update: &ProfileUpdate,
    ) -> Result<ProfileRow, BackendError>;

    // ── Reviews ─────────────────────────────────────────────────────────────

    /// The rating `user_id` gave `destination`, if any.
    async fn fetch_rating(
        &self,
        user_id: UserId,
        destination: &DestinationId,
    ) -> Result<Option<RatingRow>, BackendError>;

    /// Insert or replace the rating keyed by `(user_id, destination_id)`.
    async fn upsert_rating(&self, rating: &RatingRow) -> Result<RatingRow, BackendError>;

    /// Comments on `destination`, newest first.
    async fn list_comments(
        &self,
        destination: &DestinationId,
    ) -> Result<Vec<CommentRow>, BackendError>;

    /// Insert a comment.
    async fn insert_comment(&self, comment: &NewComment) -> Result<CommentRow, BackendError>;

    /// Delete comment `id` if it belongs to `author`. Returns whether a row was removed.
    async fn delete_comment(&self, id: CommentId, author: UserId) -> Result<bool, BackendError>;

    // ── Realtime ────────────────────────────────────────────────────────────

    /// Subscribe to row changes on `table`, optionally filtered
    /// (`auth_id=eq.<uuid>`). The feed ends when the receiver is dropped.
    async fn subscribe(
        &self,
        table: &str,
        filter: Option<&str>,
    ) -> Result<mpsc::Receiver<ChangeEvent>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::Api {
            status: 503,
            message: "upstream down".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 503 - upstream down");
        assert!(err.is_transient());

        let err = BackendError::Conflict("user already registered".to_string());
        assert_eq!(err.to_string(), "Conflict: user already registered");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_rate_limited_error() {
        let err = BackendError::RateLimited(60);
        assert_eq!(err.to_string(), "Rate limited, retry after 60 seconds");
    }
}
