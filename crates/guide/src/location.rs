//! Location state container.
//!
//! Tracks the device position, its display name and the geolocation
//! permission. The last position is cached in local storage for five minutes
//! and served immediately while a fresh reading is taken
//! (stale-while-revalidate). When nothing better is known the Tunis city
//! centre is used.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use tuni_core::{Coordinates, PermissionState, TUNIS_CITY_CENTER};

use crate::geo::{Geolocator, LocationError, PermissionSource, PositionOptions, ReverseGeocoder};
use crate::storage::KeyValueStore;

/// Storage key of the cached position.
pub const LOCATION_CACHE_KEY: &str = "lastKnownLocation";

/// How long a cached position is served without a fresh reading.
pub const LOCATION_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Name of the fallback location.
pub const DEFAULT_LOCATION_NAME: &str = "Tunis";

/// Notice shown while the fallback location is in use.
pub const DEFAULT_LOCATION_NOTICE: &str = "Using default location";

/// Name shown when reverse geocoding fails.
pub const LOCATION_UNAVAILABLE: &str = "Location unavailable";

/// Name shown before the first resolution.
pub const DETECTING_LOCATION: &str = "Detecting location...";

/// A position reading persisted under [`LOCATION_CACHE_KEY`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationCache {
    pub coordinates: Coordinates,
    /// Capture time, unix milliseconds.
    pub timestamp: i64,
}

impl LocationCache {
    /// Reading captured now.
    #[must_use]
    pub fn now(coordinates: Coordinates) -> Self {
        Self {
            coordinates,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Whether the reading is younger than [`LOCATION_CACHE_TTL`] at `now_ms`.
    #[must_use]
    pub fn is_fresh_at(&self, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(LOCATION_CACHE_TTL.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.timestamp) < ttl_ms
    }
}

/// Snapshot of the location container.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationState {
    pub coordinates: Option<Coordinates>,
    pub location_name: String,
    pub loading: bool,
    /// Last problem or notice ("Location access denied", "Using default location").
    pub error: Option<String>,
    pub permission: PermissionState,
}

impl LocationState {
    fn initial(permission: PermissionState) -> Self {
        Self {
            coordinates: None,
            location_name: DETECTING_LOCATION.to_string(),
            loading: false,
            error: None,
            permission,
        }
    }
}

/// Signals for the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationEvent {
    /// Show the permission dialog; `denied` selects its "blocked" variant.
    PermissionPrompt { denied: bool },
}

/// Device position, place name and permission.
pub struct LocationStore {
    storage: Arc<dyn KeyValueStore>,
    geolocator: Arc<dyn Geolocator>,
    geocoder: Arc<dyn ReverseGeocoder>,
    permission: Arc<dyn PermissionSource>,
    options: PositionOptions,
    state: Arc<watch::Sender<LocationState>>,
    events: broadcast::Sender<LocationEvent>,
    permission_mirror: JoinHandle<()>,
}

impl LocationStore {
    /// Build the container and start mirroring the permission state.
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        geolocator: Arc<dyn Geolocator>,
        geocoder: Arc<dyn ReverseGeocoder>,
        permission: Arc<dyn PermissionSource>,
    ) -> Self {
        let mut permission_rx = permission.watch();
        let (tx, _) = watch::channel(LocationState::initial(*permission_rx.borrow_and_update()));
        let state = Arc::new(tx);
        let (events, _) = broadcast::channel(16);

        let mirror_state = Arc::clone(&state);
        let permission_mirror = tokio::spawn(async move {
            while permission_rx.changed().await.is_ok() {
                let current = *permission_rx.borrow_and_update();
                mirror_state.send_if_modified(|s| {
                    let changed = s.permission != current;
                    s.permission = current;
                    changed
                });
            }
        });

        Self {
            storage,
            geolocator,
            geocoder,
            permission,
            options: PositionOptions::default(),
            state,
            events,
            permission_mirror,
        }
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> LocationState {
        self.state.borrow().clone()
    }

    /// Observe state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LocationState> {
        self.state.subscribe()
    }

    /// Permission prompts.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<LocationEvent> {
        self.events.subscribe()
    }

    fn permission_state(&self) -> PermissionState {
        *self.permission.watch().borrow()
    }

    /// Refresh the position.
    ///
    /// A cached reading younger than five minutes is shown at once. Then,
    /// with permission granted, a fresh reading is taken; with permission
    /// undecided, a prompt is emitted unless the cache was served; with
    /// permission denied, the fallback is used if nothing is known.
    #[instrument(skip(self))]
    pub async fn update_location(&self) -> LocationState {
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        let served_cache = match self.cached_position().await {
            Some(cached) => {
                debug!("Serving cached location");
                self.state.send_modify(|s| s.coordinates = Some(cached));
                let name = self.resolve_name(cached).await;
                self.state.send_modify(|s| s.location_name = name);
                true
            }
            None => false,
        };

        match self.permission_state() {
            PermissionState::Granted => {
                // Failures already fall back inside the request
                let _ = self.acquire().await;
            }
            PermissionState::Prompt => {
                if !served_cache {
                    let _ = self
                        .events
                        .send(LocationEvent::PermissionPrompt { denied: false });
                }
            }
            PermissionState::Denied => {
                if self.state.borrow().coordinates.is_none() {
                    self.use_default_location();
                }
            }
        }

        self.state.send_modify(|s| s.loading = false);
        self.snapshot()
    }

    /// Ask for the device position (the "allow" choice of the permission
    /// dialog).
    ///
    /// # Errors
    ///
    /// Returns `LocationError::PermissionDenied` if access is refused,
    /// `LocationError::Timeout` after five seconds, and
    /// `LocationError::Unavailable` if no position source works. The
    /// fallback location is applied when no coordinates are held.
    #[instrument(skip(self))]
    pub async fn request_permission(&self) -> Result<Coordinates, LocationError> {
        self.state.send_modify(|s| s.loading = true);
        let result = self.acquire().await;
        self.state.send_modify(|s| s.loading = false);
        result
    }

    /// Use the fallback location (the "skip" choice of the permission dialog).
    pub fn skip_permission(&self) -> LocationState {
        self.use_default_location();
        self.snapshot()
    }

    async fn acquire(&self) -> Result<Coordinates, LocationError> {
        let reading = tokio::time::timeout(
            self.options.timeout,
            self.geolocator.current_position(&self.options),
        )
        .await
        .unwrap_or(Err(LocationError::Timeout(self.options.timeout)));

        match reading {
            Ok(coordinates) => {
                info!(lat = coordinates.lat, lng = coordinates.lng, "Location acquired");
                self.state.send_modify(|s| {
                    s.coordinates = Some(coordinates);
                    s.error = None;
                });
                self.cache_position(coordinates).await;
                let name = self.resolve_name(coordinates).await;
                self.state.send_modify(|s| s.location_name = name);
                self.permission.record(PermissionState::Granted).await;
                Ok(coordinates)
            }
            Err(e) => {
                warn!(error = %e, "Error requesting location");
                if e == LocationError::PermissionDenied {
                    self.permission.record(PermissionState::Denied).await;
                }
                self.state.send_modify(|s| s.error = Some(e.to_string()));
                if self.state.borrow().coordinates.is_none() {
                    self.use_default_location();
                }
                Err(e)
            }
        }
    }

    fn use_default_location(&self) {
        info!("Using default location");
        self.state.send_modify(|s| {
            s.coordinates = Some(TUNIS_CITY_CENTER);
            s.location_name = DEFAULT_LOCATION_NAME.to_string();
            s.error = Some(DEFAULT_LOCATION_NOTICE.to_string());
        });
    }

    async fn resolve_name(&self, at: Coordinates) -> String {
        match self.geocoder.place_name(at).await {
            Ok(name) => name,
            Err(e) => {
                warn!(error = %e, "Error getting location name");
                LOCATION_UNAVAILABLE.to_string()
            }
        }
    }

    /// The cached reading, if fresh.
    async fn cached_position(&self) -> Option<Coordinates> {
        match self.storage.get_json::<LocationCache>(LOCATION_CACHE_KEY).await {
            Ok(Some(cache)) if cache.is_fresh_at(Utc::now().timestamp_millis()) => {
                Some(cache.coordinates)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Error reading cached location");
                None
            }
        }
    }

    async fn cache_position(&self, coordinates: Coordinates) {
        let cache = LocationCache::now(coordinates);
        if let Err(e) = self.storage.set_json(LOCATION_CACHE_KEY, &cache).await {
            warn!(error = %e, "Error caching location");
        }
    }
}

impl Drop for LocationStore {
    fn drop(&mut self) {
        self.permission_mirror.abort();
    }
}

impl std::fmt::Debug for LocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationStore")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
