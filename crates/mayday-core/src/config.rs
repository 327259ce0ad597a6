//! Session configuration loaded from the environment.
//!
//! Endpoint URLs, dispatch identity, narration voice, and the tuning knobs of
//! the confirm/broadcast workflow. Change behavior without code edits.

use serde::{Deserialize, Serialize};

fn default_classifier_url() -> String {
    "http://localhost:8787/assist/classify".to_string()
}

fn default_geocode_url() -> String {
    "http://localhost:8787/assist/geocode".to_string()
}

fn default_dispatch_url() -> String {
    "http://localhost:8787/assist/dispatch".to_string()
}

fn default_service_id() -> String {
    "emergency".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_confidence_threshold() -> f32 {
    0.8
}

fn default_location_timeout_secs() -> u64 {
    10
}

fn default_close_delay_ms() -> u64 {
    2000
}

/// Assist session configuration loaded from environment.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | MAYDAY_CLASSIFIER_URL | localhost classify endpoint | Conversational-turn classifier. |
/// | MAYDAY_GEOCODE_URL | localhost geocode endpoint | Forward/reverse geocoding. |
/// | MAYDAY_DISPATCH_URL | localhost dispatch endpoint | Emergency case broadcast. |
/// | MAYDAY_API_KEY | (none) | Bearer token attached to backend calls when set. |
/// | MAYDAY_SERVICE_ID | emergency | Service identity submitted with a case. |
/// | MAYDAY_LANG | en | Narration language hint. |
/// | MAYDAY_CONFIDENCE_THRESHOLD | 0.8 | Category is acted on only when strictly above this. |
/// | MAYDAY_LOCATION_TIMEOUT_SECS | 10 | Bound on one device-position attempt. |
/// | MAYDAY_CLOSE_DELAY_MS | 2000 | Delay between a successful broadcast and session close. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistConfig {
    #[serde(default = "default_classifier_url")]
    pub classifier_url: String,
    #[serde(default = "default_geocode_url")]
    pub geocode_url: String,
    #[serde(default = "default_dispatch_url")]
    pub dispatch_url: String,
    /// Optional bearer token for the backend endpoints.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_service_id")]
    pub service_id: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Strictly-greater comparison: a category at exactly this value is ignored.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_location_timeout_secs")]
    pub location_timeout_secs: u64,
    /// Lets the closing narration finish before resources are released.
    #[serde(default = "default_close_delay_ms")]
    pub close_delay_ms: u64,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            classifier_url: default_classifier_url(),
            geocode_url: default_geocode_url(),
            dispatch_url: default_dispatch_url(),
            api_key: None,
            service_id: default_service_id(),
            language: default_language(),
            confidence_threshold: default_confidence_threshold(),
            location_timeout_secs: default_location_timeout_secs(),
            close_delay_ms: default_close_delay_ms(),
        }
    }
}

impl AssistConfig {
    /// Load from environment. Unset or unparsable values fall back to the
    /// defaults documented on the struct.
    pub fn from_env() -> Self {
        Self {
            classifier_url: env_string("MAYDAY_CLASSIFIER_URL", default_classifier_url()),
            geocode_url: env_string("MAYDAY_GEOCODE_URL", default_geocode_url()),
            dispatch_url: env_string("MAYDAY_DISPATCH_URL", default_dispatch_url()),
            api_key: env_opt_string("MAYDAY_API_KEY"),
            service_id: env_string("MAYDAY_SERVICE_ID", default_service_id()),
            language: env_string("MAYDAY_LANG", default_language()),
            confidence_threshold: env_f32(
                "MAYDAY_CONFIDENCE_THRESHOLD",
                default_confidence_threshold(),
            ),
            location_timeout_secs: env_u64(
                "MAYDAY_LOCATION_TIMEOUT_SECS",
                default_location_timeout_secs(),
            ),
            close_delay_ms: env_u64("MAYDAY_CLOSE_DELAY_MS", default_close_delay_ms()),
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default,
    }
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
