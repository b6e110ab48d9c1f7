//! In-process backend for local development and tests.
//!
//! Behaves like the hosted service for everything the guide uses: password
//! accounts (optionally awaiting email confirmation), one profile per user,
//! rating upserts, author-filtered comment deletion and realtime change
//! notifications. Failures can be injected to exercise rollback paths.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use tuni_core::{CommentId, DestinationId, Email, ProfileId, UserId};

use super::types::{
    AuthEvent, AuthEventKind, AuthSession, AuthUser, COMMENTS_TABLE, ChangeEvent, ChangeKind,
    CommentRow, NewComment, NewProfile, PROFILES_TABLE, ProfileRow, ProfileUpdate, RATINGS_TABLE,
    RatingRow, SignUpOutcome,
};
use super::{Backend, BackendError};

const FEED_CAPACITY: usize = 64;

struct Account {
    user: AuthUser,
    password: String,
    confirmed: bool,
}

struct Subscriber {
    table: String,
    filter: Option<(String, String)>,
    tx: mpsc::Sender<ChangeEvent>,
}

impl Subscriber {
    fn matches(&self, event: &ChangeEvent) -> bool {
        if self.table != event.table {
            return false;
        }
        let Some((column, expected)) = &self.filter else {
            return true;
        };
        event
            .record
            .as_ref()
            .or(event.old_record.as_ref())
            .and_then(|row| row.get(column))
            .is_some_and(|value| match value {
                serde_json::Value::String(s) => s == expected,
                other => other.to_string() == *expected,
            })
    }
}

#[derive(Default)]
struct State {
    accounts: HashMap<Email, Account>,
    session: Option<AuthSession>,
    profiles: HashMap<UserId, ProfileRow>,
    ratings: HashMap<(UserId, DestinationId), RatingRow>,
    comments: Vec<CommentRow>,
    subscribers: Vec<Subscriber>,
    offline: bool,
    fail_writes: bool,
    require_confirmation: bool,
}

impl State {
    fn check_online(&self) -> Result<(), BackendError> {
        if self.offline {
            return Err(BackendError::Api {
                status: 503,
                message: "backend offline".to_string(),
            });
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), BackendError> {
        self.check_online()?;
        if self.fail_writes {
            return Err(BackendError::Api {
                status: 500,
                message: "write rejected".to_string(),
            });
        }
        Ok(())
    }

    fn signed_in_user(&self) -> Result<UserId, BackendError> {
        self.session
            .as_ref()
            .map(AuthSession::user_id)
            .ok_or(BackendError::Unauthorized)
    }

    /// Row-level security: users only write their own rows.
    fn check_owner(&self, owner: UserId) -> Result<(), BackendError> {
        if self.signed_in_user()? == owner {
            Ok(())
        } else {
            Err(BackendError::Unauthorized)
        }
    }

    fn publish<T: Serialize>(
        &mut self,
        table: &str,
        kind: ChangeKind,
        record: Option<&T>,
        old_record: Option<&T>,
    ) {
        let event = ChangeEvent {
            table: table.to_string(),
            kind,
            record: record.and_then(|r| serde_json::to_value(r).ok()),
            old_record: old_record.and_then(|r| serde_json::to_value(r).ok()),
        };
        self.subscribers.retain(|sub| {
            if sub.tx.is_closed() {
                return false;
            }
            if sub.matches(&event) {
                // A full feed drops the change, like a lagging socket
                let _ = sub.tx.try_send(event.clone());
            }
            true
        });
    }
}

/// Backend held entirely in memory.
pub struct MemoryBackend {
    state: Mutex<State>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty backend: no accounts, no rows, sign-up returns a session.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn announce(&self, kind: AuthEventKind, session: Option<AuthSession>) {
        let _ = self.events.send(AuthEvent { kind, session });
    }

    fn issue_session(user: AuthUser) -> AuthSession {
        AuthSession {
            access_token: format!("local-access-{}", uuid::Uuid::new_v4()),
            refresh_token: format!("local-refresh-{}", uuid::Uuid::new_v4()),
            expires_at: Some(Utc::now().timestamp() + 3600),
            user,
        }
    }
}

/// Switches and inspection used by tests.
#[cfg(any(test, feature = "test-util"))]
impl MemoryBackend {
    /// Make every call fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make every table write fail with a server error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Require email confirmation: sign-up returns no session and sign-in
    /// is refused until [`confirm_email`](Self::confirm_email).
    pub fn set_require_confirmation(&self, required: bool) {
        self.state().require_confirmation = required;
    }

    /// Mark an account's email as confirmed.
    pub fn confirm_email(&self, email: &Email) {
        if let Some(account) = self.state().accounts.get_mut(email) {
            account.confirmed = true;
        }
    }

    /// Drop the session server-side (e.g. revoked elsewhere) and announce it.
    pub fn revoke_session(&self) {
        self.state().session = None;
        self.announce(AuthEventKind::SignedOut, None);
    }

    /// Number of profile rows.
    #[must_use]
    pub fn profile_count(&self) -> usize {
        self.state().profiles.len()
    }

    /// All ratings `user_id` has given.
    #[must_use]
    pub fn ratings_of(&self, user_id: UserId) -> Vec<RatingRow> {
        self.state()
            .ratings
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Stored password of an account (tests check password changes).
    #[must_use]
    pub fn password_matches(&self, email: &Email, password: &str) -> bool {
        self.state()
            .accounts
            .get(email)
            .is_some_and(|a| a.password == password)
    }

    /// Change another user's profile as if edited from a second device.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the user has no profile.
    pub fn update_profile_externally(
        &self,
        auth_id: UserId,
        update: &ProfileUpdate,
    ) -> Result<ProfileRow, BackendError> {
        let mut state = self.state();
        let row = state
            .profiles
            .get_mut(&auth_id)
            .ok_or_else(|| BackendError::NotFound(format!("profile for {auth_id}")))?;
        let old = row.clone();
        update.apply_to(row);
        let new = row.clone();
        state.publish(PROFILES_TABLE, ChangeKind::Update, Some(&new), Some(&old));
        Ok(new)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn current_session(&self) -> Option<AuthSession> {
        self.state().session.clone()
    }

    async fn sign_up(
        &self,
        email: &Email,
        password: &str,
        username: &str,
    ) -> Result<SignUpOutcome, BackendError> {
        let outcome = {
            let mut state = self.state();
            state.check_online()?;
            if state.accounts.contains_key(email) {
                return Err(BackendError::Conflict("User already registered".to_string()));
            }

            let user = AuthUser {
                id: UserId::random(),
                email: Some(email.clone()),
                user_metadata: serde_json::json!({ "username": username }),
            };
            let confirmed = !state.require_confirmation;
            state.accounts.insert(
                email.clone(),
                Account {
                    user: user.clone(),
                    password: password.to_string(),
                    confirmed,
                },
            );

            let session = confirmed.then(|| Self::issue_session(user.clone()));
            if session.is_some() {
                state.session.clone_from(&session);
            }
            SignUpOutcome { user, session }
        };

        debug!(user_id = %outcome.user.id, "Account created");
        if let Some(session) = &outcome.session {
            self.announce(AuthEventKind::SignedIn, Some(session.clone()));
        }
        Ok(outcome)
    }

    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        let session = {
            let mut state = self.state();
            state.check_online()?;
            let account = state
                .accounts
                .get(email)
                .filter(|a| a.password == password)
                .ok_or(BackendError::InvalidCredentials)?;
            if !account.confirmed {
                return Err(BackendError::Api {
                    status: 400,
                    message: "Email not confirmed".to_string(),
                });
            }
            let session = Self::issue_session(account.user.clone());
            state.session = Some(session.clone());
            session
        };

        self.announce(AuthEventKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let result = {
            let mut state = self.state();
            let result = state.check_online();
            state.session = None;
            result
        };
        self.announce(AuthEventKind::SignedOut, None);
        result
    }

    async fn reset_password_for_email(
        &self,
        email: &Email,
        redirect_to: &str,
    ) -> Result<(), BackendError> {
        self.state().check_online()?;
        // Unknown addresses succeed too, so accounts cannot be enumerated
        debug!(email = %email, redirect_to, "Password reset requested");
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<AuthUser, BackendError> {
        let (user, session) = {
            let mut state = self.state();
            state.check_online()?;
            let session = state.session.clone().ok_or(BackendError::NotSignedIn)?;
            let email = session.email().cloned().ok_or(BackendError::Unauthorized)?;
            let account = state
                .accounts
                .get_mut(&email)
                .ok_or(BackendError::Unauthorized)?;
            account.password = new_password.to_string();
            (account.user.clone(), session)
        };

        self.announce(AuthEventKind::UserUpdated, Some(session));
        Ok(user)
    }

    async fn fetch_profile(&self, auth_id: UserId) -> Result<Option<ProfileRow>, BackendError> {
        let state = self.state();
        state.check_online()?;
        Ok(state.profiles.get(&auth_id).cloned())
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<ProfileRow, BackendError> {
        let mut state = self.state();
        state.check_writable()?;
        state.check_owner(profile.auth_id)?;
        if state.profiles.contains_key(&profile.auth_id) {
            return Err(BackendError::Conflict(
                "duplicate key value violates unique constraint \"user_profiles_auth_id_key\""
                    .to_string(),
            ));
        }

        let now = Utc::now();
        let row = ProfileRow {
            id: ProfileId::random(),
            auth_id: profile.auth_id,
            name: profile.name.clone(),
            age: None,
            occupation: None,
            nationality: None,
            bio: None,
            preferences: profile.preferences.clone(),
            created_at: now,
            updated_at: now,
        };
        state.profiles.insert(row.auth_id, row.clone());
        state.publish(PROFILES_TABLE, ChangeKind::Insert, Some(&row), None);
        Ok(row)
    }

    async fn update_profile(
        &self,
        auth_id: UserId,
        update: &ProfileUpdate,
    ) -> Result<ProfileRow, BackendError> {
        let mut state = self.state();
        state.check_writable()?;
        state.check_owner(auth_id)?;
        let row = state
            .profiles
            .get_mut(&auth_id)
            .ok_or_else(|| BackendError::NotFound(format!("profile for {auth_id}")))?;
        let old = row.clone();
        update.apply_to(row);
        let new = row.clone();
        state.publish(PROFILES_TABLE, ChangeKind::Update, Some(&new), Some(&old));
        Ok(new)
    }

    async fn fetch_rating(
        &self,
        user_id: UserId,
        destination: &DestinationId,
    ) -> Result<Option<RatingRow>, BackendError> {
        let state = self.state();
        state.check_online()?;
        Ok(state
            .ratings
            .get(&(user_id, destination.clone()))
            .cloned())
    }

    async fn upsert_rating(&self, rating: &RatingRow) -> Result<RatingRow, BackendError> {
        let mut state = self.state();
        state.check_writable()?;
        state.check_owner(rating.user_id)?;
        let key = (rating.user_id, rating.destination_id.clone());
        let old = state.ratings.insert(key, rating.clone());
        let kind = if old.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        state.publish(RATINGS_TABLE, kind, Some(rating), old.as_ref());
        Ok(rating.clone())
    }

    async fn list_comments(
        &self,
        destination: &DestinationId,
    ) -> Result<Vec<CommentRow>, BackendError> {
        let state = self.state();
        state.check_online()?;
        let mut comments: Vec<CommentRow> = state
            .comments
            .iter()
            .filter(|c| &c.destination_id == destination)
            .cloned()
            .collect();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(comments)
    }

    async fn insert_comment(&self, comment: &NewComment) -> Result<CommentRow, BackendError> {
        let mut state = self.state();
        state.check_writable()?;
        state.check_owner(comment.user_id)?;
        let row = CommentRow {
            id: CommentId::random(),
            user_id: comment.user_id,
            destination_id: comment.destination_id.clone(),
            body: comment.body.clone(),
            author_label: comment.author_label.clone(),
            created_at: Utc::now(),
        };
        state.comments.push(row.clone());
        state.publish(COMMENTS_TABLE, ChangeKind::Insert, Some(&row), None);
        Ok(row)
    }

    async fn delete_comment(&self, id: CommentId, author: UserId) -> Result<bool, BackendError> {
        let mut state = self.state();
        state.check_writable()?;
        state.check_owner(author)?;
        let Some(index) = state
            .comments
            .iter()
            .position(|c| c.id == id && c.user_id == author)
        else {
            return Ok(false);
        };
        let removed = state.comments.remove(index);
        state.publish(COMMENTS_TABLE, ChangeKind::Delete, None, Some(&removed));
        Ok(true)
    }

    async fn subscribe(
        &self,
        table: &str,
        filter: Option<&str>,
    ) -> Result<mpsc::Receiver<ChangeEvent>, BackendError> {
        let filter = filter
            .map(|raw| {
                raw.split_once("=eq.")
                    .map(|(column, value)| (column.to_string(), value.to_string()))
                    .ok_or_else(|| {
                        BackendError::Realtime(format!("unsupported filter '{raw}'"))
                    })
            })
            .transpose()?;

        let mut state = self.state();
        state.check_online()?;
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        state.subscribers.push(Subscriber {
            table: table.to_string(),
            filter,
            tx,
        });
        Ok(rx)
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MemoryBackend")
            .field("accounts", &state.accounts.len())
            .field("profiles", &state.profiles.len())
            .field("comments", &state.comments.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tuni_core::Rating;

    fn email(raw: &str) -> Email {
        Email::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_sign_up_then_sign_in() {
        let backend = MemoryBackend::new();
        let mut events = backend.auth_events();

        let outcome = backend
            .sign_up(&email("a@b.com"), "pw123456", "alice")
            .await
            .unwrap();
        assert!(outcome.session.is_some());
        assert_eq!(events.recv().await.unwrap().kind, AuthEventKind::SignedIn);

        assert!(matches!(
            backend.sign_up(&email("a@b.com"), "other123", "x").await,
            Err(BackendError::Conflict(_))
        ));
        assert!(matches!(
            backend.sign_in_with_password(&email("a@b.com"), "wrong").await,
            Err(BackendError::InvalidCredentials)
        ));

        let session = backend
            .sign_in_with_password(&email("A@B.com"), "pw123456")
            .await
            .unwrap();
        assert_eq!(session.user_id(), outcome.user.id);
    }

    #[tokio::test]
    async fn test_confirmation_required() {
        let backend = MemoryBackend::new();
        backend.set_require_confirmation(true);

        let outcome = backend
            .sign_up(&email("a@b.com"), "pw123456", "alice")
            .await
            .unwrap();
        assert!(outcome.session.is_none());
        assert!(backend.current_session().await.is_none());
        assert!(
            backend
                .sign_in_with_password(&email("a@b.com"), "pw123456")
                .await
                .is_err()
        );

        backend.confirm_email(&email("a@b.com"));
        assert!(
            backend
                .sign_in_with_password(&email("a@b.com"), "pw123456")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_rating_upsert_keeps_one_row() {
        let backend = MemoryBackend::new();
        let user = backend
            .sign_up(&email("a@b.com"), "pw123456", "alice")
            .await
            .unwrap()
            .user;
        let destination = DestinationId::new("medina");

        for value in [5, 3] {
            backend
                .upsert_rating(&RatingRow {
                    user_id: user.id,
                    destination_id: destination.clone(),
                    rating: Rating::new(value).unwrap(),
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let ratings = backend.ratings_of(user.id);
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].rating.value(), 3);
    }

    #[tokio::test]
    async fn test_writes_require_owner() {
        let backend = MemoryBackend::new();
        let result = backend
            .insert_profile(&NewProfile::new(UserId::random(), "mallory"))
            .await;
        assert!(matches!(result, Err(BackendError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_delete_comment_filters_by_author() {
        let backend = MemoryBackend::new();
        let user = backend
            .sign_up(&email("a@b.com"), "pw123456", "alice")
            .await
            .unwrap()
            .user;
        let comment = backend
            .insert_comment(&NewComment {
                user_id: user.id,
                destination_id: DestinationId::new("medina"),
                body: "Lovely souks".to_string(),
                author_label: "alice".to_string(),
            })
            .await
            .unwrap();

        assert!(!backend.delete_comment(CommentId::random(), user.id).await.unwrap());
        assert!(backend.delete_comment(comment.id, user.id).await.unwrap());
        assert!(
            backend
                .list_comments(&DestinationId::new("medina"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_subscribe_filters_by_column() {
        let backend = MemoryBackend::new();
        let user = backend
            .sign_up(&email("a@b.com"), "pw123456", "alice")
            .await
            .unwrap()
            .user;

        let filter = format!("auth_id=eq.{}", user.id);
        let mut mine = backend.subscribe(PROFILES_TABLE, Some(&filter)).await.unwrap();
        let mut other = backend
            .subscribe(PROFILES_TABLE, Some("auth_id=eq.nobody"))
            .await
            .unwrap();

        backend
            .insert_profile(&NewProfile::new(user.id, "alice"))
            .await
            .unwrap();

        let event = mine.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record.unwrap()["name"], "alice");
        assert!(other.try_recv().is_err());

        assert!(backend.subscribe(PROFILES_TABLE, Some("auth_id")).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        assert!(matches!(
            backend.sign_up(&email("a@b.com"), "pw123456", "alice").await,
            Err(BackendError::Api { status: 503, .. })
        ));
        backend.set_offline(false);

        let user = backend
            .sign_up(&email("a@b.com"), "pw123456", "alice")
            .await
            .unwrap()
            .user;
        backend.set_fail_writes(true);
        assert!(
            backend
                .insert_profile(&NewProfile::new(user.id, "alice"))
                .await
                .is_err()
        );
        assert!(backend.fetch_profile(user.id).await.unwrap().is_none());
    }
}
