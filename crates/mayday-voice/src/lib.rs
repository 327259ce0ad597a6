//! # Mayday Voice - Emergency Assistant Session
//!
//! The voice front door of the dispatch system: capture live microphone
//! audio, recognize speech one push-to-talk turn at a time, converse with the
//! remote classifier, narrate replies, and drive the confirm/broadcast
//! workflow that files a real emergency case.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    Conversation Session                       │
//! │  ┌──────────────┐   ┌───────────────┐   ┌────────────────┐  │
//! │  │ Level Monitor│──▶│  Recognition  │──▶│ Session Machine │  │
//! │  │ (cpal + RMS) │tap│ (VAD + STT)   │   │ chat→confirm→  │  │
//! │  └──────────────┘   └───────────────┘   │   broadcast    │  │
//! │         │                               └────────┬───────┘  │
//! │  ┌──────────────┐      stop-before-listen        │          │
//! │  │   Playback   │◀───────────────────────────────┘          │
//! │  │   (rodio)    │        classifier / dispatch via HTTP     │
//! │  └──────────────┘                                           │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod error;
pub mod level;
pub mod playback;
pub mod recognition;
pub mod session;
pub mod stt;

pub use audio::{AudioCapture, AudioChunk, AudioConfig};
pub use error::{VoiceError, VoiceResult};
pub use level::{AudioLevelMonitor, MicTap};
pub use playback::{HttpTts, PlaceholderTts, SpeechPlayback, SpeechSynthesizer};
pub use recognition::{
    RecognitionErrorKind, RecognitionEvent, RecognitionEngine, RecognitionState,
    RecognizerConfig, ScriptedRecognizer, SpeechRecognitionController, TurnRecognizer,
};
pub use session::{ConversationSession, SessionEvent};
pub use stt::{pcm_to_wav, HttpStt, PlaceholderStt, SttBackend};
