//! Integration tests for the five-minute location cache and permission
//! prompts.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tuni_core::{PermissionState, TUNIS_CITY_CENTER};
use tuni_guide::geo::{LocationError, PERMISSION_STATE_KEY};
use tuni_guide::location::{
    DEFAULT_LOCATION_NAME, DEFAULT_LOCATION_NOTICE, LOCATION_CACHE_KEY, LocationCache,
    LocationEvent,
};
use tuni_guide::storage::{KeyValueStore, MemoryStore};
use tuni_integration_tests::{
    CountingGeolocator, LA_MARSA, MEDINA, TestGuide, seed_location_cache, seed_permission,
};

const FOUR_MINUTES: Duration = Duration::from_secs(4 * 60);
const SIX_MINUTES: Duration = Duration::from_secs(6 * 60);

async fn guide_with(
    cache_age: Option<Duration>,
    permission: Option<PermissionState>,
    geolocator: CountingGeolocator,
) -> TestGuide {
    let storage = Arc::new(MemoryStore::new());
    if let Some(age) = cache_age {
        seed_location_cache(&storage, LA_MARSA, age).await;
    }
    if let Some(permission) = permission {
        seed_permission(&storage, permission).await;
    }
    TestGuide::build(storage, geolocator).await
}

// =============================================================================
// Cache freshness
// =============================================================================

#[tokio::test]
async fn test_fresh_cache_is_served_without_prompting() {
    let guide = guide_with(Some(FOUR_MINUTES), None, CountingGeolocator::at(MEDINA)).await;
    let mut events = guide.state.location().events();

    let state = guide.state.location().update_location().await;

    assert_eq!(state.coordinates, Some(LA_MARSA));
    assert_eq!(state.location_name, "La Marsa");
    assert!(!state.loading);
    assert!(events.try_recv().is_err());
    assert_eq!(guide.geolocator.calls(), 0);
}

#[tokio::test]
async fn test_stale_cache_asks_for_permission() {
    let guide = guide_with(Some(SIX_MINUTES), None, CountingGeolocator::at(MEDINA)).await;
    let mut events = guide.state.location().events();

    let state = guide.state.location().update_location().await;

    assert_eq!(state.coordinates, None);
    assert_eq!(
        events.try_recv().unwrap(),
        LocationEvent::PermissionPrompt { denied: false }
    );
    assert_eq!(guide.geolocator.calls(), 0);
}

#[tokio::test]
async fn test_stale_cache_with_permission_takes_fresh_reading() {
    let guide = guide_with(
        Some(SIX_MINUTES),
        Some(PermissionState::Granted),
        CountingGeolocator::at(MEDINA),
    )
    .await;

    let state = guide.state.location().update_location().await;

    assert_eq!(state.coordinates, Some(MEDINA));
    assert_eq!(state.location_name, "Tunis");
    assert_eq!(guide.geolocator.calls(), 1);

    let store: Arc<dyn KeyValueStore> = Arc::clone(&guide.storage) as Arc<dyn KeyValueStore>;
    let cache: LocationCache = store.get_json(LOCATION_CACHE_KEY).await.unwrap().unwrap();
    assert_eq!(cache.coordinates, MEDINA);
    assert!(cache.is_fresh_at(chrono::Utc::now().timestamp_millis()));
}

#[tokio::test]
async fn test_fresh_cache_with_permission_still_refreshes() {
    let guide = guide_with(
        Some(FOUR_MINUTES),
        Some(PermissionState::Granted),
        CountingGeolocator::at(MEDINA),
    )
    .await;

    let state = guide.state.location().update_location().await;

    assert_eq!(state.coordinates, Some(MEDINA));
    assert_eq!(guide.geolocator.calls(), 1);
}

// =============================================================================
// Permission decisions
// =============================================================================

#[tokio::test]
async fn test_denied_without_cache_falls_back_to_tunis() {
    let guide = guide_with(None, Some(PermissionState::Denied), CountingGeolocator::at(MEDINA)).await;

    let state = guide.state.location().update_location().await;

    assert_eq!(state.coordinates, Some(TUNIS_CITY_CENTER));
    assert_eq!(state.location_name, DEFAULT_LOCATION_NAME);
    assert_eq!(state.error.as_deref(), Some(DEFAULT_LOCATION_NOTICE));
    assert_eq!(guide.geolocator.calls(), 0);
}

#[tokio::test]
async fn test_refused_request_is_remembered() {
    let guide = guide_with(None, None, CountingGeolocator::refusing()).await;

    let result = guide.state.location().request_permission().await;

    assert_eq!(result, Err(LocationError::PermissionDenied));
    assert_eq!(
        guide.storage.get(PERMISSION_STATE_KEY).await.unwrap().as_deref(),
        Some("denied")
    );
    let state = guide.state.location().snapshot();
    assert_eq!(state.coordinates, Some(TUNIS_CITY_CENTER));

    // The next run starts from the recorded decision
    let storage = Arc::clone(&guide.storage);
    drop(guide);
    let again = TestGuide::build(storage, CountingGeolocator::at(MEDINA)).await;
    assert_eq!(again.state.location().snapshot().permission, PermissionState::Denied);
}

#[tokio::test]
async fn test_allowing_records_grant_and_caches() {
    let guide = guide_with(None, None, CountingGeolocator::at(MEDINA)).await;

    let at = guide.state.location().request_permission().await.unwrap();

    assert_eq!(at, MEDINA);
    assert_eq!(
        guide.storage.get(PERMISSION_STATE_KEY).await.unwrap().as_deref(),
        Some("granted")
    );
    assert!(guide.storage.get(LOCATION_CACHE_KEY).await.unwrap().is_some());
}
