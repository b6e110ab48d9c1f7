//! Integration tests for the Tuni travel guide.
//!
//! The tests drive a full [`GuideState`] wired to the in-process
//! [`MemoryBackend`], so they need no network or hosted project.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p tuni-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `auth_flow` - Sign-up, sign-in and profile creation
//! - `interactions` - Ratings, comments and sign-in gating
//! - `location_cache` - Cache freshness and permission prompts
//! - `favorites_profile` - Favorites kept in profile preferences

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use tuni_core::{Coordinates, PermissionState};
use tuni_guide::backend::{Backend, MemoryBackend};
use tuni_guide::geo::{Geolocator, LocationError, PERMISSION_STATE_KEY, PositionOptions, ReverseGeocoder};
use tuni_guide::location::{LOCATION_CACHE_KEY, LocationCache};
use tuni_guide::storage::{KeyValueStore, MemoryStore};
use tuni_guide::{GuideParts, GuideState};

/// Somewhere in the Medina.
pub const MEDINA: Coordinates = Coordinates::new(36.7992, 10.1706);

/// La Marsa, a short train ride away.
pub const LA_MARSA: Coordinates = Coordinates::new(36.8892, 10.3229);

/// Geolocator that reports a fixed position and counts requests.
#[derive(Debug)]
pub struct CountingGeolocator {
    position: Result<Coordinates, LocationError>,
    calls: AtomicUsize,
}

impl CountingGeolocator {
    #[must_use]
    pub const fn at(position: Coordinates) -> Self {
        Self {
            position: Ok(position),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn refusing() -> Self {
        Self {
            position: Err(LocationError::PermissionDenied),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of position requests so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geolocator for CountingGeolocator {
    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Coordinates, LocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.position.clone()
    }
}

/// Names every position after the nearest landmark it was told about.
#[derive(Debug)]
pub struct LandmarkGeocoder;

#[async_trait]
impl ReverseGeocoder for LandmarkGeocoder {
    async fn place_name(&self, at: Coordinates) -> Result<String, LocationError> {
        let name = if at.distance_km(&LA_MARSA) < at.distance_km(&MEDINA) {
            "La Marsa"
        } else {
            "Tunis"
        };
        Ok(name.to_string())
    }
}

/// A guide over in-memory collaborators, with handles to inspect them.
pub struct TestGuide {
    pub state: GuideState,
    pub backend: Arc<MemoryBackend>,
    pub storage: Arc<MemoryStore>,
    pub geolocator: Arc<CountingGeolocator>,
}

impl TestGuide {
    /// Fresh storage, a device in the Medina.
    pub async fn new() -> Self {
        Self::build(Arc::new(MemoryStore::new()), CountingGeolocator::at(MEDINA)).await
    }

    /// Build over pre-seeded storage.
    pub async fn build(storage: Arc<MemoryStore>, geolocator: CountingGeolocator) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let geolocator = Arc::new(geolocator);

        let state = GuideState::from_parts(GuideParts {
            backend: Arc::clone(&backend) as Arc<dyn Backend>,
            storage: Arc::clone(&storage) as Arc<dyn KeyValueStore>,
            geolocator: Arc::clone(&geolocator) as Arc<dyn Geolocator>,
            geocoder: Arc::new(LandmarkGeocoder),
            reset_redirect: "http://localhost:5173/reset-password".to_string(),
        })
        .await;

        Self {
            state,
            backend,
            storage,
            geolocator,
        }
    }
}

/// Store a location reading taken `age` ago.
///
/// # Panics
///
/// Panics if the store rejects the write.
pub async fn seed_location_cache(storage: &Arc<MemoryStore>, at: Coordinates, age: Duration) {
    let age_ms = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
    let cache = LocationCache {
        coordinates: at,
        timestamp: Utc::now().timestamp_millis() - age_ms,
    };
    let store: Arc<dyn KeyValueStore> = Arc::clone(storage) as Arc<dyn KeyValueStore>;
    store
        .set_json(LOCATION_CACHE_KEY, &cache)
        .await
        .expect("seed location cache");
}

/// Record a permission decision, as a previous run would have.
///
/// # Panics
///
/// Panics if the store rejects the write.
pub async fn seed_permission(storage: &Arc<MemoryStore>, state: PermissionState) {
    storage
        .set(PERMISSION_STATE_KEY, state.as_str())
        .await
        .expect("seed permission");
}
