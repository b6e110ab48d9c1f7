//! Guide state shared by front ends.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::backend::{Backend, BackendError, ProfileRow, SupabaseClient};
use crate::config::GuideConfig;
use crate::error::{GuideError, PersistenceError};
use crate::favorites::FavoritesStore;
use crate::geo::{
    FixedGeolocator, Geolocator, IpGeolocator, NominatimGeocoder, ReverseGeocoder,
    StoredPermission, UnavailableGeolocator,
};
use crate::interactions::InteractionStore;
use crate::location::LocationStore;
use crate::profile::ProfileStore;
use crate::session::SessionStore;
use crate::storage::{FileStore, KeyValueStore};

/// `User-Agent` sent to geocoding and geolocation services.
const USER_AGENT: &str = concat!("tuni-guide/", env!("CARGO_PKG_VERSION"));

/// The backend client and every state container, wired together.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct GuideState {
    inner: Arc<GuideStateInner>,
}

struct GuideStateInner {
    backend: Arc<dyn Backend>,
    storage: Arc<dyn KeyValueStore>,
    session: Arc<SessionStore>,
    profiles: ProfileStore,
    location: LocationStore,
    interactions: InteractionStore,
    favorites: FavoritesStore,
}

/// Collaborators for [`GuideState::from_parts`].
pub struct GuideParts {
    pub backend: Arc<dyn Backend>,
    pub storage: Arc<dyn KeyValueStore>,
    pub geolocator: Arc<dyn Geolocator>,
    pub geocoder: Arc<dyn ReverseGeocoder>,
    /// Password reset links land here.
    pub reset_redirect: String,
}

impl GuideState {
    /// Connect to the configured backend and build the containers.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    #[instrument(skip_all, fields(backend = %config.backend.url))]
    pub async fn from_config(config: &GuideConfig) -> Result<Self, GuideError> {
        let storage: Arc<dyn KeyValueStore> = Arc::new(FileStore::in_dir(&config.data_dir));
        let backend = SupabaseClient::connect(&config.backend, Arc::clone(&storage)).await?;

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.backend.request_timeout)
            .build()
            .map_err(BackendError::from)?;

        let geolocator: Arc<dyn Geolocator> = match (
            config.location.device_position,
            &config.location.ip_locator_url,
        ) {
            (Some(position), _) => Arc::new(FixedGeolocator::new(position)),
            (None, Some(url)) => Arc::new(IpGeolocator::new(http.clone(), url.clone())),
            (None, None) => Arc::new(UnavailableGeolocator),
        };
        let geocoder = Arc::new(NominatimGeocoder::new(
            http,
            config.location.geocoder_url.clone(),
        ));

        info!("Guide state ready");
        Ok(Self::from_parts(GuideParts {
            backend: Arc::new(backend),
            storage,
            geolocator,
            geocoder,
            reset_redirect: config.reset_password_url(),
        })
        .await)
    }

    /// Build the containers over the given collaborators.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn from_parts(parts: GuideParts) -> Self {
        let GuideParts {
            backend,
            storage,
            geolocator,
            geocoder,
            reset_redirect,
        } = parts;

        let session = Arc::new(SessionStore::new(Arc::clone(&backend), reset_redirect).await);
        let permission = Arc::new(StoredPermission::load(Arc::clone(&storage)).await);
        let location = LocationStore::new(Arc::clone(&storage), geolocator, geocoder, permission);
        let profiles = ProfileStore::new(Arc::clone(&backend), Arc::clone(&session));
        let interactions = InteractionStore::new(Some(Arc::clone(&backend)), Arc::clone(&session));

        Self {
            inner: Arc::new(GuideStateInner {
                backend,
                storage,
                session,
                profiles,
                location,
                interactions,
                favorites: FavoritesStore::new(),
            }),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.storage
    }

    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    #[must_use]
    pub fn profiles(&self) -> &ProfileStore {
        &self.inner.profiles
    }

    #[must_use]
    pub fn location(&self) -> &LocationStore {
        &self.inner.location
    }

    #[must_use]
    pub fn interactions(&self) -> &InteractionStore {
        &self.inner.interactions
    }

    #[must_use]
    pub fn favorites(&self) -> &FavoritesStore {
        &self.inner.favorites
    }

    /// Fetch the signed-in user's profile and adopt its saved favorites.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the profile cannot be loaded.
    pub async fn load_profile(&self) -> Result<Option<ProfileRow>, PersistenceError> {
        let profile = self.profiles().fetch().await?;
        match &profile {
            Some(row) => self.favorites().load_from_profile(row),
            None => debug!("No signed-in user; favorites stay local"),
        }
        Ok(profile)
    }
}

impl std::fmt::Debug for GuideState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuideState")
            .field("session", &self.inner.session)
            .field("profiles", &self.inner.profiles)
            .field("location", &self.inner.location)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, ProfileUpdate};
    use crate::storage::MemoryStore;
    use serde_json::json;
    use tuni_core::{DestinationId, TUNIS_CITY_CENTER};

    struct NoNames;

    #[async_trait::async_trait]
    impl ReverseGeocoder for NoNames {
        async fn place_name(
            &self,
            _at: tuni_core::Coordinates,
        ) -> Result<String, crate::geo::LocationError> {
            Ok("Tunis".to_string())
        }
    }

    async fn memory_state() -> GuideState {
        GuideState::from_parts(GuideParts {
            backend: Arc::new(MemoryBackend::new()),
            storage: Arc::new(MemoryStore::new()),
            geolocator: Arc::new(FixedGeolocator::new(TUNIS_CITY_CENTER)),
            geocoder: Arc::new(NoNames),
            reset_redirect: "http://localhost:5173/reset-password".to_string(),
        })
        .await
    }

    #[tokio::test]
    async fn test_load_profile_adopts_saved_favorites() {
        let state = memory_state().await;
        state.session().signup("a@b.com", "pw123456", "alice").await.unwrap();
        state
            .profiles()
            .update(ProfileUpdate {
                preferences: Some(json!({"favorites": ["carthage"]})),
                ..ProfileUpdate::default()
            })
            .await
            .unwrap();

        let row = state.load_profile().await.unwrap().unwrap();
        assert_eq!(row.name, "alice");
        assert!(state.favorites().is_favorite(&DestinationId::new("carthage")));
    }

    #[tokio::test]
    async fn test_signed_out_state_has_no_profile() {
        let state = memory_state().await;
        assert!(!state.session().is_authenticated());
        assert!(state.load_profile().await.unwrap().is_none());
        assert!(state.favorites().favorites().is_empty());
    }
}
