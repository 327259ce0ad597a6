//! Device position and geocoding.
//!
//! The resolver pairs a [`PositionSource`] (platform capability) with a
//! [`Geocoder`]. Whatever fails, the resulting location always carries a
//! usable text: a postal address when reverse geocoding succeeds, the
//! formatted coordinates otherwise. Position acquisition is time-bounded and
//! retried once; it never polls unbounded.

use crate::error::{CoreError, CoreResult};
use crate::types::{coordinate_text, Location};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Platform capability yielding device coordinates. Implementors apply their
/// own accuracy policy; the resolver only bounds time.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current_position(&self) -> CoreResult<(f64, f64)>;
}

/// Fixed position for tests and headless demos.
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition {
    pub lat: f64,
    pub lng: f64,
}

#[async_trait]
impl PositionSource for FixedPosition {
    async fn current_position(&self) -> CoreResult<(f64, f64)> {
        Ok((self.lat, self.lng))
    }
}

/// Forward (address → coordinates) and reverse (coordinates → address) lookups.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse(&self, lat: f64, lng: f64) -> CoreResult<String>;
    async fn forward(&self, address: &str) -> CoreResult<Location>;
}

#[derive(Serialize)]
struct ReverseRequest {
    lat: f64,
    lng: f64,
}

#[derive(Serialize)]
struct ForwardRequest<'a> {
    address: &'a str,
}

/// Either coordinates/address or an explicit error field.
#[derive(Deserialize)]
struct GeoResponse {
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lng: Option<f64>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Production geocoder over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGeocoder {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpGeocoder {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CoreError::Geocoding(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            api_key,
            client,
        })
    }

    async fn call<B: Serialize>(&self, mode: &str, body: &B) -> CoreResult<GeoResponse> {
        let url = format!("{}/{}", self.url.trim_end_matches('/'), mode);
        let mut req = self.client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req
            .send()
            .await
            .map_err(|e| CoreError::Geocoding(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Geocoding(format!(
                "geocoder returned {}: {}",
                status, body
            )));
        }
        let parsed = res
            .json::<GeoResponse>()
            .await
            .map_err(|e| CoreError::Geocoding(e.to_string()))?;
        if let Some(err) = parsed.error {
            return Err(CoreError::Geocoding(err));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn reverse(&self, lat: f64, lng: f64) -> CoreResult<String> {
        let parsed = self.call("reverse", &ReverseRequest { lat, lng }).await?;
        parsed
            .address
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| CoreError::Geocoding("reverse lookup returned no address".to_string()))
    }

    async fn forward(&self, address: &str) -> CoreResult<Location> {
        let parsed = self.call("forward", &ForwardRequest { address }).await?;
        match (parsed.lat, parsed.lng) {
            (Some(lat), Some(lng)) => Ok(Location {
                lat,
                lng,
                address: parsed
                    .address
                    .filter(|a| !a.trim().is_empty())
                    .or_else(|| Some(address.to_string())),
            }),
            _ => Err(CoreError::Geocoding(
                "forward lookup returned no coordinates".to_string(),
            )),
        }
    }
}

/// Static geocoder for tests: fixed address (or failure) and call counting.
#[derive(Default)]
pub struct StaticGeocoder {
    pub address: Option<String>,
    pub forward_result: Option<Location>,
    calls: std::sync::Mutex<usize>,
}

impl StaticGeocoder {
    pub fn resolving_to(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }

    /// A geocoder whose lookups always fail.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        *crate::classifier::lock_ignore_poison(&self.calls)
    }

    fn record(&self) {
        *crate::classifier::lock_ignore_poison(&self.calls) += 1;
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn reverse(&self, _lat: f64, _lng: f64) -> CoreResult<String> {
        self.record();
        self.address
            .clone()
            .ok_or_else(|| CoreError::Geocoding("no address configured".to_string()))
    }

    async fn forward(&self, address: &str) -> CoreResult<Location> {
        self.record();
        self.forward_result
            .clone()
            .map(|loc| Location {
                address: loc.address.or_else(|| Some(address.to_string())),
                ..loc
            })
            .ok_or_else(|| CoreError::Geocoding("no forward result configured".to_string()))
    }
}

const POSITION_ATTEMPTS: u32 = 2;

/// Resolves the caller's location from the device, with reverse geocoding and
/// a coordinate-text fallback so the address is never empty.
pub struct LocationResolver {
    source: Arc<dyn PositionSource>,
    geocoder: Arc<dyn Geocoder>,
    timeout: Duration,
}

impl LocationResolver {
    pub fn new(source: Arc<dyn PositionSource>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self {
            source,
            geocoder,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Acquire device coordinates (bounded, retried once) and reverse-geocode.
    /// The returned location always has `Some(address)`: the postal address,
    /// or the formatted coordinates when the lookup fails.
    pub async fn locate_device(&self) -> CoreResult<Location> {
        let (lat, lng) = self.position_with_retry().await?;

        let address = match self.geocoder.reverse(lat, lng).await {
            Ok(a) => a,
            Err(e) => {
                warn!("reverse geocoding failed, using coordinates: {}", e);
                coordinate_text(lat, lng)
            }
        };
        Ok(Location::new(lat, lng).with_address(address))
    }

    /// Forward-geocode free text the user typed. Returns `None` without a
    /// lookup when the text is empty or already looks like a coordinate pair
    /// (contains a comma).
    pub async fn resolve_typed_address(&self, text: &str) -> CoreResult<Option<Location>> {
        let text = text.trim();
        if text.is_empty() || text.contains(',') {
            debug!("typed address skipped (empty or coordinate-like)");
            return Ok(None);
        }
        self.geocoder.forward(text).await.map(Some)
    }

    async fn position_with_retry(&self) -> CoreResult<(f64, f64)> {
        let mut last_err = None;
        for attempt in 1..=POSITION_ATTEMPTS {
            match tokio::time::timeout(self.timeout, self.source.current_position()).await {
                Ok(Ok(pos)) => return Ok(pos),
                Ok(Err(e)) => {
                    debug!("position attempt {} failed: {}", attempt, e);
                    last_err = Some(e);
                }
                Err(_) => {
                    debug!("position attempt {} timed out", attempt);
                    last_err = Some(CoreError::Timeout("device position".to_string()));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CoreError::Position("no position source".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DeniedPosition;

    #[async_trait]
    impl PositionSource for DeniedPosition {
        async fn current_position(&self) -> CoreResult<(f64, f64)> {
            Err(CoreError::Position("permission denied".to_string()))
        }
    }

    fn resolver(geocoder: StaticGeocoder) -> LocationResolver {
        LocationResolver::new(
            Arc::new(FixedPosition { lat: 52.52, lng: 13.405 }),
            Arc::new(geocoder),
        )
    }

    #[tokio::test]
    async fn locate_device_uses_reverse_address() {
        let r = resolver(StaticGeocoder::resolving_to("Alexanderplatz 1"));
        let loc = r.locate_device().await.unwrap();
        assert_eq!(loc.address.as_deref(), Some("Alexanderplatz 1"));
        assert!(!loc.display_string().is_empty());
    }

    #[tokio::test]
    async fn locate_device_falls_back_to_coordinates() {
        let r = resolver(StaticGeocoder::failing());
        let loc = r.locate_device().await.unwrap();
        // Address field still populated: the formatted coordinate pair.
        assert_eq!(loc.address.as_deref(), Some("52.520000, 13.405000"));
    }

    #[tokio::test]
    async fn denied_position_is_an_error_not_a_hang() {
        let r = LocationResolver::new(
            Arc::new(DeniedPosition),
            Arc::new(StaticGeocoder::resolving_to("unused")),
        )
        .with_timeout(Duration::from_millis(50));
        let err = r.locate_device().await.unwrap_err();
        assert!(matches!(err, CoreError::Position(_)));
    }

    #[tokio::test]
    async fn coordinate_like_text_skips_lookup() {
        let geocoder = StaticGeocoder::resolving_to("unused");
        let r = LocationResolver::new(
            Arc::new(FixedPosition { lat: 0.0, lng: 0.0 }),
            Arc::new(geocoder),
        );
        let out = r.resolve_typed_address("52.52, 13.405").await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn typed_address_forward_geocodes() {
        let geocoder = StaticGeocoder {
            forward_result: Some(Location::new(48.85, 2.35)),
            ..Default::default()
        };
        let r = LocationResolver::new(
            Arc::new(FixedPosition { lat: 0.0, lng: 0.0 }),
            Arc::new(geocoder),
        );
        let loc = r
            .resolve_typed_address("Rue de Rivoli, Paris")
            .await
            .unwrap()
            .unwrap();
        assert!((loc.lat - 48.85).abs() < 1e-9);
        assert_eq!(loc.address.as_deref(), Some("Rue de Rivoli, Paris"));
    }

    #[test]
    fn geo_response_error_field_parses() {
        let r: GeoResponse = serde_json::from_str(r#"{"error": "ZERO_RESULTS"}"#).unwrap();
        assert_eq!(r.error.as_deref(), Some("ZERO_RESULTS"));
        assert!(r.address.is_none());
    }
}
