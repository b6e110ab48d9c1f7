//! Reverse geocoding: coordinates to a place name.
//!
//! Uses Nominatim's `/reverse` endpoint. Names are memoised with `moka`
//! (5-minute TTL), keyed by coordinates rounded to 4 decimals.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use tuni_core::Coordinates;

use super::LocationError;

/// Name used when the address has no city, town or suburb.
pub const UNKNOWN_LOCATION: &str = "Unknown Location";

const CACHE_TTL: Duration = Duration::from_secs(300);

/// Resolves coordinates to a display name.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn place_name(&self, at: Coordinates) -> Result<String, LocationError>;
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Option<Address>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Address {
    city: Option<String>,
    town: Option<String>,
    suburb: Option<String>,
}

impl ReverseResponse {
    /// `city || town || suburb || "Unknown Location"`; no address at all is a
    /// failed lookup.
    fn place_name(self) -> Result<String, LocationError> {
        let Some(Address { city, town, suburb }) = self.address else {
            let reason = self.error.unwrap_or_else(|| "no address in response".to_string());
            return Err(LocationError::Lookup(reason));
        };
        Ok([city, town, suburb]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()))
    }
}

/// Nominatim client with a name cache.
#[derive(Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    endpoint: Url,
    cache: Cache<String, String>,
}

impl NominatimGeocoder {
    /// Geocoder against `endpoint` (e.g. `https://nominatim.openstreetmap.org/reverse`).
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(CACHE_TTL)
            .build();

        Self {
            client,
            endpoint,
            cache,
        }
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    #[instrument(skip(self), fields(lat = at.lat, lng = at.lng))]
    async fn place_name(&self, at: Coordinates) -> Result<String, LocationError> {
        let cache_key = at.rounded_key();
        if let Some(name) = self.cache.get(&cache_key).await {
            debug!(name = %name, "Place name cache hit");
            return Ok(name);
        }

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("format", "json".to_string()),
                ("lat", at.lat.to_string()),
                ("lon", at.lng.to_string()),
                ("zoom", "18".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .send()
            .await
            .map_err(|e| LocationError::Lookup(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LocationError::Lookup(format!(
                "geocoder returned {}",
                response.status()
            )));
        }

        let name = response
            .json::<ReverseResponse>()
            .await
            .map_err(|e| LocationError::Lookup(e.to_string()))?
            .place_name()?;

        self.cache.insert(cache_key, name.clone()).await;
        Ok(name)
    }
}

impl std::fmt::Debug for NominatimGeocoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NominatimGeocoder")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn name(json: &str) -> Result<String, LocationError> {
        serde_json::from_str::<ReverseResponse>(json)
            .unwrap()
            .place_name()
    }

    #[test]
    fn test_place_name_fallback_order() {
        assert_eq!(
            name(r#"{"address":{"city":"Tunis","town":"Bardo","suburb":"Lafayette"}}"#).unwrap(),
            "Tunis"
        );
        assert_eq!(
            name(r#"{"address":{"town":"La Marsa","suburb":"Gammarth"}}"#).unwrap(),
            "La Marsa"
        );
        assert_eq!(name(r#"{"address":{"suburb":"Sidi Bou Said"}}"#).unwrap(), "Sidi Bou Said");
        assert_eq!(
            name(r#"{"address":{"road":"Avenue Habib Bourguiba"}}"#).unwrap(),
            UNKNOWN_LOCATION
        );
    }

    #[test]
    fn test_missing_address_is_a_failed_lookup() {
        match name(r#"{"error":"Unable to geocode"}"#) {
            Err(LocationError::Lookup(reason)) => assert_eq!(reason, "Unable to geocode"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(name("{}"), Err(LocationError::Lookup(_))));
    }

    #[tokio::test]
    async fn test_failed_lookups_are_not_cached() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/reverse")
                .query_param("format", "json")
                .query_param("addressdetails", "1");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({"error": "Unable to geocode"}));
        });

        let geocoder = NominatimGeocoder::new(
            reqwest::Client::new(),
            Url::parse(&server.url("/reverse")).unwrap(),
        );
        let at = Coordinates::new(37.5, 11.5);

        assert!(matches!(geocoder.place_name(at).await, Err(LocationError::Lookup(_))));
        assert!(matches!(geocoder.place_name(at).await, Err(LocationError::Lookup(_))));
        mock.assert_calls(2);
    }

    #[tokio::test]
    async fn test_found_names_are_cached() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/reverse");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({"address": {"suburb": "Sidi Bou Said"}}));
        });

        let geocoder = NominatimGeocoder::new(
            reqwest::Client::new(),
            Url::parse(&server.url("/reverse")).unwrap(),
        );
        let at = Coordinates::new(36.8708, 10.3417);

        assert_eq!(geocoder.place_name(at).await.unwrap(), "Sidi Bou Said");
        assert_eq!(geocoder.place_name(at).await.unwrap(), "Sidi Bou Said");
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn test_cached_names_skip_the_network() {
        // Unroutable endpoint: any network call would fail
        let geocoder = NominatimGeocoder::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9/reverse").unwrap(),
        );
        let at = Coordinates::new(36.806_51, 10.181_49);
        geocoder
            .cache
            .insert(at.rounded_key(), "Tunis".to_string())
            .await;

        assert_eq!(geocoder.place_name(at).await.unwrap(), "Tunis");
        assert!(matches!(
            geocoder.place_name(Coordinates::new(35.0, 9.0)).await,
            Err(LocationError::Lookup(_))
        ));
    }
}
