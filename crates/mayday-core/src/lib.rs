//! # Mayday Core — emergency assist data model and backend bridges
//!
//! Shared types for the voice-assistant session plus the three remote
//! collaborators it talks to: the conversational classifier, the geocoder,
//! and the dispatch backend. All network access lives here; device capture
//! and speech live in `mayday-voice`.

pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod geo;
pub mod types;

pub use classifier::{Classifier, ClassifierReply, HttpClassifier, ScriptedClassifier};
pub use config::AssistConfig;
pub use dispatch::{DispatchBackend, HttpDispatch, RecordingDispatch};
pub use error::{CoreError, CoreResult};
pub use geo::{
    FixedPosition, Geocoder, HttpGeocoder, LocationResolver, PositionSource, StaticGeocoder,
};
pub use types::{
    coordinate_text, transcript_text, CaseReceipt, DetectedCategory, EmergencyCase, Location,
    Message, Phase, Role,
};
