//! Session state container.
//!
//! Holds who is signed in. The state is seeded from the backend's current
//! session and then follows every notification on
//! [`Backend::auth_events`]: each one atomically replaces the held session.
//! Operations never panic; failures come back as [`AuthError`].

mod error;

pub use error::AuthError;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use tuni_core::{Email, UserId};

use crate::backend::{AuthEvent, AuthSession, AuthUser, Backend};
use crate::error::{add_breadcrumb, clear_sentry_user, set_sentry_user};
use crate::profile::ensure_profile;

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum username length.
const MAX_USERNAME_LENGTH: usize = 50;

/// Snapshot of the session container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// The current session, if any.
    pub session: Option<AuthSession>,
    /// Whether a user is signed in.
    pub is_authenticated: bool,
}

impl SessionState {
    fn from_session(session: Option<AuthSession>) -> Self {
        Self {
            is_authenticated: session.is_some(),
            session,
        }
    }

    /// The signed-in user.
    #[must_use]
    pub fn user(&self) -> Option<&AuthUser> {
        self.session.as_ref().map(|s| &s.user)
    }

    /// Id of the signed-in user.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.session.as_ref().map(AuthSession::user_id)
    }
}

/// Authentication state and operations.
pub struct SessionStore {
    backend: Arc<dyn Backend>,
    state: Arc<watch::Sender<SessionState>>,
    reset_redirect: String,
    /// Usernames given at sign-up that could not create a profile yet
    /// (email confirmation pending); used by the first login.
    pending_usernames: Mutex<HashMap<Email, String>>,
    listener: JoinHandle<()>,
}

impl SessionStore {
    /// Seed from the backend's current session and start following its
    /// session changes. Must be called within a Tokio runtime.
    ///
    /// `reset_redirect` is where password-reset emails send the user.
    pub async fn new(backend: Arc<dyn Backend>, reset_redirect: impl Into<String>) -> Self {
        // Subscribe first so no change between the read and the listener is lost
        let events = backend.auth_events();
        let initial = backend.current_session().await;
        if let Some(session) = &initial {
            set_sentry_user(&session.user_id(), session.email().map(Email::as_str));
        }

        let (tx, _) = watch::channel(SessionState::from_session(initial));
        let state = Arc::new(tx);
        let listener = tokio::spawn(follow_auth_events(
            events,
            Arc::clone(&backend),
            Arc::clone(&state),
        ));

        Self {
            backend,
            state,
            reset_redirect: reset_redirect.into(),
            pending_usernames: Mutex::new(HashMap::new()),
            listener,
        }
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Observe state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Whether a user is signed in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    /// Id of the signed-in user.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.state.borrow().user_id()
    }

    /// The signed-in user.
    #[must_use]
    pub fn user(&self) -> Option<AuthUser> {
        self.state.borrow().user().cloned()
    }

    fn apply(&self, session: Option<AuthSession>) {
        self.state.send_replace(SessionState::from_session(session));
    }

    /// Sign in and make sure the user has a profile.
    ///
    /// A failed profile check does not fail the login.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` for a malformed email,
    /// `AuthError::InvalidCredentials` for a wrong pair, and
    /// `AuthError::Network` when the backend is unreachable.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let email = Email::parse(email)?;
        if password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let session = self.backend.sign_in_with_password(&email, password).await?;
        self.apply(Some(session.clone()));
        set_sentry_user(&session.user_id(), Some(email.as_str()));
        add_breadcrumb("auth", "Logged in", None);
        info!(user_id = %session.user_id(), "User logged in");

        let name = self.take_pending_username(&email).unwrap_or_else(|| {
            session
                .user
                .display_name()
                .unwrap_or_else(|| email.local_part().to_owned())
        });
        if let Err(e) = ensure_profile(self.backend.as_ref(), session.user_id(), &name).await {
            warn!(error = %e, "Error creating user profile");
        }

        Ok(())
    }

    /// Create an account with `username` as its display name.
    ///
    /// When the backend signs the user in straight away the profile is
    /// created now; otherwise it is created by the first login.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail`, `AuthError::WeakPassword` or
    /// `AuthError::InvalidUsername` before any network call,
    /// `AuthError::UserAlreadyExists` for a taken email, and
    /// `AuthError::Profile` if the profile could not be created.
    #[instrument(skip(self, password))]
    pub async fn signup(&self, email: &str, password: &str, username: &str) -> Result<(), AuthError> {
        let email = Email::parse(email)?;
        validate_password(password)?;
        let username = validate_username(username)?;

        let outcome = self.backend.sign_up(&email, password, &username).await?;
        add_breadcrumb("auth", "Signed up", None);

        let Some(session) = outcome.session else {
            info!(user_id = %outcome.user.id, "Account created, awaiting email confirmation");
            self.pending_usernames
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(email, username);
            return Ok(());
        };

        self.apply(Some(session.clone()));
        set_sentry_user(&session.user_id(), Some(email.as_str()));
        info!(user_id = %session.user_id(), "Account created");

        ensure_profile(self.backend.as_ref(), session.user_id(), &username)
            .await
            .map_err(AuthError::Profile)?;
        Ok(())
    }

    /// Sign out. Backend failures are logged; local state is always cleared.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Err(e) = self.backend.sign_out().await {
            warn!(error = %e, "Error logging out");
        }
        self.apply(None);
        clear_sentry_user();
        add_breadcrumb("auth", "Logged out", None);
    }

    /// Send a password-reset email.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` for a malformed email and
    /// `AuthError::Network` when the backend is unreachable.
    #[instrument(skip(self))]
    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        let email = Email::parse(email)?;
        self.backend
            .reset_password_for_email(&email, &self.reset_redirect)
            .await?;
        debug!("Password reset email requested");
        Ok(())
    }

    /// Change the signed-in user's password.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::WeakPassword` for a short password and
    /// `AuthError::NotSignedIn` without a session.
    #[instrument(skip_all)]
    pub async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        validate_password(new_password)?;
        if !self.is_authenticated() {
            return Err(AuthError::NotSignedIn);
        }
        self.backend.update_password(new_password).await?;
        add_breadcrumb("auth", "Password updated", None);
        Ok(())
    }

    fn take_pending_username(&self, email: &Email) -> Option<String> {
        self.pending_usernames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(email)
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Replace the held session on every change notification.
async fn follow_auth_events(
    mut events: broadcast::Receiver<AuthEvent>,
    backend: Arc<dyn Backend>,
    state: Arc<watch::Sender<SessionState>>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                debug!(kind = ?event.kind, "Auth state changed");
                if event.session.is_none() {
                    clear_sentry_user();
                }
                state.send_replace(SessionState::from_session(event.session));
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Missed changes: resynchronise from the source
                warn!(skipped, "Auth events lagged");
                let session = backend.current_session().await;
                state.send_replace(SessionState::from_session(session));
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<String, AuthError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AuthError::InvalidUsername(
            "username cannot be empty".to_string(),
        ));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(AuthError::InvalidUsername(format!(
            "username must be at most {MAX_USERNAME_LENGTH} characters"
        )));
    }
    Ok(username.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    async fn store() -> (Arc<MemoryBackend>, SessionStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = SessionStore::new(
            Arc::clone(&backend) as Arc<dyn Backend>,
            "http://localhost:5173/reset-password",
        )
        .await;
        (backend, store)
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("pw123456").is_ok());
        assert!(matches!(
            validate_password("short"),
            Err(AuthError::WeakPassword(_))
        ));
    }

    #[test]
    fn test_validate_username() {
        assert_eq!(validate_username("  alice ").unwrap(), "alice");
        assert!(validate_username("   ").is_err());
        assert!(validate_username(&"a".repeat(51)).is_err());
    }

    #[tokio::test]
    async fn test_signup_creates_profile_and_signs_in() {
        let (backend, store) = store().await;
        store.signup("a@b.com", "pw123456", "alice").await.unwrap();

        assert!(store.is_authenticated());
        let user_id = store.user_id().unwrap();
        let profile = backend.fetch_profile(user_id).await.unwrap().unwrap();
        assert_eq!(profile.name, "alice");
    }

    #[tokio::test]
    async fn test_signup_validates_before_network() {
        let (backend, store) = store().await;
        backend.set_offline(true);
        assert!(matches!(
            store.signup("not-an-email", "pw123456", "alice").await,
            Err(AuthError::InvalidEmail(_))
        ));
        assert!(matches!(
            store.signup("a@b.com", "short", "alice").await,
            Err(AuthError::WeakPassword(_))
        ));
        assert!(matches!(
            store.signup("a@b.com", "pw123456", "alice").await,
            Err(AuthError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let (_backend, store) = store().await;
        store.signup("a@b.com", "pw123456", "alice").await.unwrap();
        store.logout().await;

        assert!(matches!(
            store.login("a@b.com", "wrong-password").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_confirmation_flow_uses_signup_username() {
        let (backend, store) = store().await;
        backend.set_require_confirmation(true);

        store.signup("a@b.com", "pw123456", "alice").await.unwrap();
        assert!(!store.is_authenticated());
        assert_eq!(backend.profile_count(), 0);

        backend.confirm_email(&Email::parse("a@b.com").unwrap());
        store.login("a@b.com", "pw123456").await.unwrap();
        let profile = backend
            .fetch_profile(store.user_id().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.name, "alice");
    }

    #[tokio::test]
    async fn test_logout_clears_state_even_when_offline() {
        let (backend, store) = store().await;
        store.signup("a@b.com", "pw123456", "alice").await.unwrap();

        backend.set_offline(true);
        store.logout().await;
        assert!(!store.is_authenticated());
        assert!(store.snapshot().session.is_none());
    }

    #[tokio::test]
    async fn test_follows_backend_session_changes() {
        let (backend, store) = store().await;
        let mut rx = store.subscribe();
        store.signup("a@b.com", "pw123456", "alice").await.unwrap();

        backend.revoke_session();
        let state = rx
            .wait_for(|s| !s.is_authenticated)
            .await
            .unwrap()
            .clone();
        assert!(state.session.is_none());
    }

    #[tokio::test]
    async fn test_update_password_requires_session() {
        let (backend, store) = store().await;
        assert!(matches!(
            store.update_password("new-password").await,
            Err(AuthError::NotSignedIn)
        ));

        store.signup("a@b.com", "pw123456", "alice").await.unwrap();
        store.update_password("new-password").await.unwrap();
        assert!(backend.password_matches(&Email::parse("a@b.com").unwrap(), "new-password"));
    }
}
