//! Favorites state container.
//!
//! A set of destination ids. Membership lives for the session unless synced
//! to the profile's `preferences.favorites` list.

use std::collections::BTreeSet;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, instrument};

use tuni_core::DestinationId;

use crate::backend::{ProfileRow, ProfileUpdate};
use crate::error::PersistenceError;
use crate::profile::ProfileStore;

/// Key of the favorites list inside profile preferences.
pub const FAVORITES_PREFERENCE: &str = "favorites";

/// Favorited destinations.
#[derive(Debug)]
pub struct FavoritesStore {
    state: watch::Sender<BTreeSet<DestinationId>>,
}

impl Default for FavoritesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FavoritesStore {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(BTreeSet::new());
        Self { state }
    }

    /// Flip membership of `destination`; returns whether it is now a favorite.
    pub fn toggle_favorite(&self, destination: &DestinationId) -> bool {
        let mut now_favorite = false;
        self.state.send_modify(|set| {
            now_favorite = set.insert(destination.clone());
            if !now_favorite {
                set.remove(destination);
            }
        });
        debug!(%destination, now_favorite, "Toggled favorite");
        now_favorite
    }

    #[must_use]
    pub fn is_favorite(&self, destination: &DestinationId) -> bool {
        self.state.borrow().contains(destination)
    }

    /// All favorites, in id order.
    #[must_use]
    pub fn favorites(&self) -> Vec<DestinationId> {
        self.state.borrow().iter().cloned().collect()
    }

    /// Observe the set.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<BTreeSet<DestinationId>> {
        self.state.subscribe()
    }

    /// Replace the set with the profile's `preferences.favorites`.
    ///
    /// Non-string entries are skipped.
    pub fn load_from_profile(&self, profile: &ProfileRow) {
        let loaded: BTreeSet<DestinationId> = profile
            .preferences
            .get(FAVORITES_PREFERENCE)
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(DestinationId::from)
                    .collect()
            })
            .unwrap_or_default();
        self.state.send_replace(loaded);
    }

    /// Write the set to the profile's `preferences.favorites`, keeping the
    /// other preferences.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::NotSignedIn` without a session, or the
    /// backend failure.
    #[instrument(skip_all)]
    pub async fn sync_to_profile(&self, profiles: &ProfileStore) -> Result<ProfileRow, PersistenceError> {
        let profile = match profiles.snapshot() {
            Some(profile) => profile,
            None => profiles.fetch().await?.ok_or(PersistenceError::NotSignedIn)?,
        };

        let ids: Vec<Value> = self
            .favorites()
            .into_iter()
            .map(|id| Value::String(id.as_str().to_owned()))
            .collect();
        let mut preferences = match profile.preferences {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        preferences.insert(FAVORITES_PREFERENCE.to_string(), Value::Array(ids));

        profiles
            .update(ProfileUpdate {
                preferences: Some(Value::Object(preferences)),
                ..ProfileUpdate::default()
            })
            .await
    }
}
