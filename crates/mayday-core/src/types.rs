//! Conversation and dispatch data model.
//!
//! A session transcript is an append-only list of [`Message`]s. Messages are
//! immutable once created; the in-progress (unfinalized) speech text lives
//! outside the transcript until a final recognition result promotes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn's worth of text. Immutable; the ordered list forms the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Flatten a transcript into the single description string submitted with a case.
pub fn transcript_text(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Where the session currently is in the confirm/broadcast workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Accepting user turns and classifying them.
    Chat,
    /// A category cleared the confidence threshold; waiting for accept/decline.
    Confirmation,
    /// Submitting the case to the dispatch backend.
    Broadcasting,
}

/// Caller coordinates with an optional human-readable address.
///
/// `address` may lag behind `lat`/`lng` while reverse geocoding is in flight.
/// `display_string` never returns an empty value for a known position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Address if present and non-empty, otherwise the formatted coordinates.
    pub fn display_string(&self) -> String {
        match self.address.as_deref().map(str::trim) {
            Some(a) if !a.is_empty() => a.to_string(),
            _ => coordinate_text(self.lat, self.lng),
        }
    }
}

/// Fallback text for a position with no resolvable address.
pub fn coordinate_text(lat: f64, lng: f64) -> String {
    format!("{:.6}, {:.6}", lat, lng)
}

/// Emergency category returned by the classifier.
///
/// Only acted on when `confidence` is strictly above the session threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedCategory {
    pub id: String,
    pub name: String,
    /// 0.0..=1.0 from the classifier.
    pub confidence: f32,
}

/// The record submitted to the dispatch backend on confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyCase {
    pub category_id: String,
    pub category_name: String,
    pub service_id: String,
    /// Full transcript, concatenated (see [`transcript_text`]).
    pub description: String,
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

/// Identifier of a persisted case, reported back by the dispatch backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReceipt {
    pub id: String,
}
