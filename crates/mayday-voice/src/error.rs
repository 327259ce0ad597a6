//! Error types for the voice session.
//!
//! Capability and permission failures end the current action only; classifier
//! and dispatch failures (wrapped in [`VoiceError::Core`]) keep the session
//! open with the transcript intact. No-speech and intentional aborts never
//! become errors at all — see `recognition::RecognitionErrorKind`.

use mayday_core::CoreError;
use thiserror::Error;

/// Result type alias for voice operations.
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice session.
#[derive(Error, Debug)]
pub enum VoiceError {
    /// No speech engine is available on this platform. Fail fast; never
    /// attempt to start listening.
    #[error("Speech recognition unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => VoiceError::AudioDevice(
                "input device unavailable (unplugged or permission denied)".to_string(),
            ),
            other => VoiceError::AudioDevice(other.to_string()),
        }
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => VoiceError::AudioDevice(
                "input device unavailable (unplugged or permission denied)".to_string(),
            ),
            other => VoiceError::AudioStream(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_pass_through() {
        let e: VoiceError = CoreError::Broadcast("down".to_string()).into();
        assert!(e.to_string().contains("down"));
    }

    #[test]
    fn device_not_available_maps_to_device_error() {
        let e: VoiceError = cpal::BuildStreamError::DeviceNotAvailable.into();
        assert!(matches!(e, VoiceError::AudioDevice(_)));
    }
}
