//! Profile container: the signed-in user's `user_profiles` row.
//!
//! Fetching creates the row when it is missing. Realtime notifications carry
//! the changed row, which is applied in place rather than re-fetched.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use tuni_core::UserId;

use crate::backend::{
    Backend, BackendError, ChangeEvent, ChangeKind, NewProfile, PROFILES_TABLE, ProfileRow,
    ProfileUpdate,
};
use crate::error::PersistenceError;
use crate::session::SessionStore;

/// Name given to profiles of users with neither metadata nor email.
const DEFAULT_PROFILE_NAME: &str = "User";

/// Return the profile of `auth_id`, inserting one named `name` if missing.
///
/// Safe to call repeatedly: a concurrent insert surfacing as a conflict is
/// resolved by reading the winner's row.
///
/// # Errors
///
/// Returns `BackendError` if the select or insert fails.
pub async fn ensure_profile(
    backend: &dyn Backend,
    auth_id: UserId,
    name: &str,
) -> Result<ProfileRow, BackendError> {
    if let Some(existing) = backend.fetch_profile(auth_id).await? {
        return Ok(existing);
    }

    match backend.insert_profile(&NewProfile::new(auth_id, name)).await {
        Ok(row) => {
            info!(%auth_id, "Created user profile");
            Ok(row)
        }
        Err(BackendError::Conflict(_)) => backend
            .fetch_profile(auth_id)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("profile for {auth_id}"))),
        Err(e) => Err(e),
    }
}

/// Apply one realtime change to the held profile.
fn apply_change(current: &mut Option<ProfileRow>, event: ChangeEvent) {
    match event.kind {
        ChangeKind::Insert | ChangeKind::Update => {
            let Some(record) = event.record else {
                return;
            };
            match serde_json::from_value::<ProfileRow>(record) {
                Ok(row) => *current = Some(row),
                Err(e) => warn!(error = %e, "Ignoring malformed profile change"),
            }
        }
        ChangeKind::Delete => *current = None,
    }
}

/// The signed-in user's profile.
pub struct ProfileStore {
    backend: Arc<dyn Backend>,
    session: Arc<SessionStore>,
    state: Arc<watch::Sender<Option<ProfileRow>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ProfileStore {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, session: Arc<SessionStore>) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            backend,
            session,
            state: Arc::new(tx),
            watcher: Mutex::new(None),
        }
    }

    /// The profile currently held.
    #[must_use]
    pub fn snapshot(&self) -> Option<ProfileRow> {
        self.state.borrow().clone()
    }

    /// Observe profile changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<ProfileRow>> {
        self.state.subscribe()
    }

    /// Load the profile, creating it if the user has none.
    ///
    /// Signed-out users have no profile: returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the backend calls fail.
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<Option<ProfileRow>, PersistenceError> {
        let Some(user) = self.session.user() else {
            self.state.send_replace(None);
            return Ok(None);
        };

        let name = user
            .display_name()
            .unwrap_or_else(|| DEFAULT_PROFILE_NAME.to_string());
        let row = ensure_profile(self.backend.as_ref(), user.id, &name).await?;
        self.state.send_replace(Some(row.clone()));
        Ok(Some(row))
    }

    /// Update the profile, stamping `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::NotSignedIn` without a session and
    /// `PersistenceError::NotFound` if the user has no profile yet.
    #[instrument(skip(self, update))]
    pub async fn update(&self, mut update: ProfileUpdate) -> Result<ProfileRow, PersistenceError> {
        let auth_id = self.session.user_id().ok_or(PersistenceError::NotSignedIn)?;
        update.updated_at = Some(Utc::now());

        let row = self.backend.update_profile(auth_id, &update).await?;
        self.state.send_replace(Some(row.clone()));
        Ok(row)
    }

    /// Follow realtime changes to the signed-in user's profile.
    ///
    /// Replaces any previous subscription.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::NotSignedIn` without a session, or a
    /// backend error if the subscription cannot be opened.
    #[instrument(skip(self))]
    pub async fn watch_changes(&self) -> Result<(), PersistenceError> {
        let auth_id = self.session.user_id().ok_or(PersistenceError::NotSignedIn)?;
        let filter = format!("auth_id=eq.{auth_id}");
        let feed = self.backend.subscribe(PROFILES_TABLE, Some(&filter)).await?;

        let task = tokio::spawn(apply_feed(feed, Arc::clone(&self.state)));
        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    /// Stop following realtime changes.
    pub fn stop_watching(&self) {
        if let Some(task) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn apply_feed(
    mut feed: mpsc::Receiver<ChangeEvent>,
    state: Arc<watch::Sender<Option<ProfileRow>>>,
) {
    while let Some(event) = feed.recv().await {
        debug!(kind = ?event.kind, "Profile changed");
        state.send_modify(|current| apply_change(current, event));
    }
}

impl Drop for ProfileStore {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

impl std::fmt::Debug for ProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileStore")
            .field("profile", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    async fn signed_in() -> (Arc<MemoryBackend>, Arc<SessionStore>, ProfileStore) {
        let backend = Arc::new(MemoryBackend::new());
        let dyn_backend: Arc<dyn Backend> = Arc::clone(&backend) as Arc<dyn Backend>;
        let session = Arc::new(SessionStore::new(Arc::clone(&dyn_backend), "http://x/reset").await);
        session.signup("a@b.com", "pw123456", "alice").await.unwrap();
        let profiles = ProfileStore::new(dyn_backend, Arc::clone(&session));
        (backend, session, profiles)
    }

    #[tokio::test]
    async fn test_ensure_profile_is_idempotent() {
        let (backend, session, _profiles) = signed_in().await;
        let user_id = session.user_id().unwrap();

        let first = ensure_profile(backend.as_ref(), user_id, "alice").await.unwrap();
        let second = ensure_profile(backend.as_ref(), user_id, "other").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "alice");
        assert_eq!(backend.profile_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_signed_out_is_none() {
        let (_backend, session, profiles) = signed_in().await;
        session.logout().await;
        assert!(profiles.fetch().await.unwrap().is_none());
        assert!(profiles.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_update_stamps_updated_at() {
        let (_backend, _session, profiles) = signed_in().await;
        let before = profiles.fetch().await.unwrap().unwrap();

        let row = profiles
            .update(ProfileUpdate {
                bio: Some("Loves the medina".to_string()),
                ..ProfileUpdate::default()
            })
            .await
            .unwrap();
        assert_eq!(row.bio.as_deref(), Some("Loves the medina"));
        assert!(row.updated_at >= before.updated_at);
        assert_eq!(profiles.snapshot().unwrap().bio.as_deref(), Some("Loves the medina"));
    }

    #[tokio::test]
    async fn test_watch_applies_targeted_updates() {
        let (backend, session, profiles) = signed_in().await;
        profiles.fetch().await.unwrap();
        profiles.watch_changes().await.unwrap();
        let mut rx = profiles.subscribe();

        backend
            .update_profile_externally(
                session.user_id().unwrap(),
                &ProfileUpdate {
                    occupation: Some("Guide".to_string()),
                    ..ProfileUpdate::default()
                },
            )
            .unwrap();

        let row = rx
            .wait_for(|p| p.as_ref().and_then(|p| p.occupation.as_deref()) == Some("Guide"))
            .await
            .unwrap()
            .clone()
            .unwrap();
        assert_eq!(row.name, "alice");
    }

    #[test]
    fn test_apply_change_ignores_malformed_rows() {
        let mut current = None;
        apply_change(
            &mut current,
            ChangeEvent {
                table: PROFILES_TABLE.to_string(),
                kind: ChangeKind::Update,
                record: Some(json!({"name": "missing ids"})),
                old_record: None,
            },
        );
        assert!(current.is_none());
    }
}
