//! Device position and permission sources.
//!
//! The location container never talks to hardware directly: it asks a
//! [`Geolocator`] for a position and observes a [`PermissionSource`] for the
//! platform permission. The CLI wires a fixed position, an IP lookup, or
//! nothing at all.

pub mod geocoder;

pub use geocoder::{NominatimGeocoder, ReverseGeocoder, UNKNOWN_LOCATION};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{instrument, warn};
use url::Url;

use tuni_core::{Coordinates, PermissionState};

use crate::storage::KeyValueStore;

/// Storage key of the recorded permission state.
pub const PERMISSION_STATE_KEY: &str = "locationPermissionState";

/// Errors from acquiring or naming a position.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationError {
    /// The user or platform refused access.
    #[error("Location access denied")]
    PermissionDenied,

    /// No position within the allotted time.
    #[error("Location request timed out after {0:?}")]
    Timeout(Duration),

    /// No position source available.
    #[error("Location unavailable: {0}")]
    Unavailable(String),

    /// Reverse geocoding failed.
    #[error("Location lookup failed: {0}")]
    Lookup(String),
}

/// Options for a single position request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest acceptable cached reading; zero forces a fresh one.
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_secs(5),
            maximum_age: Duration::ZERO,
        }
    }
}

/// Source of the device position.
#[async_trait]
pub trait Geolocator: Send + Sync {
    /// Read the current position.
    async fn current_position(&self, options: &PositionOptions)
    -> Result<Coordinates, LocationError>;
}

/// Always reports the same position.
#[derive(Debug, Clone, Copy)]
pub struct FixedGeolocator {
    position: Coordinates,
}

impl FixedGeolocator {
    #[must_use]
    pub const fn new(position: Coordinates) -> Self {
        Self { position }
    }
}

#[async_trait]
impl Geolocator for FixedGeolocator {
    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Coordinates, LocationError> {
        Ok(self.position)
    }
}

/// For hosts with no position source.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableGeolocator;

#[async_trait]
impl Geolocator for UnavailableGeolocator {
    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<Coordinates, LocationError> {
        Err(LocationError::Unavailable(
            "no position source configured".to_string(),
        ))
    }
}

/// IP geolocation response; accepts both `lat/lon` and `latitude/longitude`.
#[derive(Debug, Deserialize)]
struct IpLocation {
    #[serde(alias = "latitude")]
    lat: f64,
    #[serde(alias = "lon", alias = "longitude")]
    lng: f64,
}

/// Coarse position from an IP geolocation service.
#[derive(Debug, Clone)]
pub struct IpGeolocator {
    client: reqwest::Client,
    endpoint: Url,
}

impl IpGeolocator {
    #[must_use]
    pub const fn new(client: reqwest::Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Geolocator for IpGeolocator {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<Coordinates, LocationError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LocationError::Timeout(options.timeout)
                } else {
                    LocationError::Unavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(LocationError::Unavailable(format!(
                "IP locator returned {}",
                response.status()
            )));
        }

        let located: IpLocation = response
            .json()
            .await
            .map_err(|e| LocationError::Unavailable(e.to_string()))?;
        let position = Coordinates::new(located.lat, located.lng);
        if position.is_valid() {
            Ok(position)
        } else {
            Err(LocationError::Unavailable(
                "IP locator returned an invalid position".to_string(),
            ))
        }
    }
}

// =============================================================================
// Permission
// =============================================================================

/// The platform geolocation permission.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Observe the permission; the receiver sees every later change.
    fn watch(&self) -> watch::Receiver<PermissionState>;

    /// Re-read the permission from the platform.
    async fn refresh(&self) -> PermissionState;

    /// Record the outcome of a position request.
    async fn record(&self, state: PermissionState);
}

/// Permission remembered in local storage.
///
/// For hosts without a platform permission API: the user's decision is kept
/// under [`PERMISSION_STATE_KEY`].
pub struct StoredPermission {
    storage: Arc<dyn KeyValueStore>,
    tx: watch::Sender<PermissionState>,
}

impl StoredPermission {
    /// Load the recorded state; unreadable or missing values mean `Prompt`.
    pub async fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let state = read_state(&storage).await;
        let (tx, _) = watch::channel(state);
        Self { storage, tx }
    }
}

async fn read_state(storage: &Arc<dyn KeyValueStore>) -> PermissionState {
    match storage.get(PERMISSION_STATE_KEY).await {
        Ok(Some(raw)) => raw.parse().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring unreadable permission state");
            PermissionState::Prompt
        }),
        Ok(None) => PermissionState::Prompt,
        Err(e) => {
            warn!(error = %e, "Error checking permission");
            PermissionState::Prompt
        }
    }
}

#[async_trait]
impl PermissionSource for StoredPermission {
    fn watch(&self) -> watch::Receiver<PermissionState> {
        self.tx.subscribe()
    }

    async fn refresh(&self) -> PermissionState {
        let state = read_state(&self.storage).await;
        self.tx.send_replace(state);
        state
    }

    async fn record(&self, state: PermissionState) {
        if let Err(e) = self.storage.set(PERMISSION_STATE_KEY, state.as_str()).await {
            warn!(error = %e, "Failed to persist permission state");
        }
        self.tx.send_replace(state);
    }
}

impl std::fmt::Debug for StoredPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredPermission")
            .field("state", &*self.tx.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_position_options_default() {
        let options = PositionOptions::default();
        assert!(options.enable_high_accuracy);
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.maximum_age, Duration::ZERO);
    }

    #[test]
    fn test_ip_location_field_aliases() {
        let a: IpLocation = serde_json::from_str(r#"{"status":"success","lat":36.8,"lon":10.18}"#).unwrap();
        let b: IpLocation = serde_json::from_str(r#"{"latitude":36.8,"longitude":10.18}"#).unwrap();
        assert!((a.lng - b.lng).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_fixed_and_unavailable() {
        let here = Coordinates::new(36.85, 10.32);
        let options = PositionOptions::default();
        assert_eq!(
            FixedGeolocator::new(here).current_position(&options).await.unwrap(),
            here
        );
        assert!(matches!(
            UnavailableGeolocator.current_position(&options).await,
            Err(LocationError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_stored_permission_roundtrip() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let permission = StoredPermission::load(Arc::clone(&storage)).await;
        let mut rx = permission.watch();
        assert_eq!(*rx.borrow(), PermissionState::Prompt);

        permission.record(PermissionState::Granted).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), PermissionState::Granted);

        let reloaded = StoredPermission::load(storage).await;
        assert_eq!(*reloaded.watch().borrow(), PermissionState::Granted);
    }

    #[tokio::test]
    async fn test_stored_permission_ignores_garbage() {
        let storage: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        storage.set(PERMISSION_STATE_KEY, "sometimes").await.unwrap();
        let permission = StoredPermission::load(storage).await;
        assert_eq!(permission.refresh().await, PermissionState::Prompt);
    }
}
