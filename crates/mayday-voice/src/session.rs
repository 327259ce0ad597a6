//! **Conversation session** — the confirm/broadcast state machine.
//!
//! One `ConversationSession` exists per open assistant dialog. It owns the
//! transcript, the current phase, and every device resource (level monitor,
//! recognition controller, narration playback) as explicit fields; each
//! acquisition path disposes its predecessor first, and `close()` releases
//! everything from any exit path, as many times as it is called.
//!
//! Phases: `Chat → Confirmation → Broadcasting → (success: closed |
//! failure: back to Chat)`. A detected category transitions to confirmation
//! only when its confidence is strictly above the configured threshold.

use crate::error::{VoiceError, VoiceResult};
use crate::level::AudioLevelMonitor;
use crate::playback::{SpeechPlayback, SpeechSynthesizer};
use crate::recognition::{
    RecognitionErrorKind, RecognitionEvent, SpeechRecognitionController,
};
use mayday_core::{
    transcript_text, AssistConfig, Classifier, DetectedCategory, DispatchBackend, EmergencyCase,
    Location, Message, Phase,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Narrated when the user accepts the detected category.
const CONFIRM_PHRASE: &str = "Okay. I'm alerting emergency responders near you now.";
/// Appended when the classifier call fails; the transcript is preserved.
const CLASSIFIER_APOLOGY: &str =
    "I'm sorry, I'm having trouble understanding right now. Could you say that again?";
/// Appended when the broadcast fails; the user can re-confirm.
const BROADCAST_APOLOGY: &str =
    "I'm sorry, I couldn't send the alert out. Nothing was dispatched - please try confirming again.";
/// Appended when the user declines the detected category.
const DECLINE_PROMPT: &str = "Okay, I won't send that. Can you tell me more about what's happening?";
/// Appended when a broadcast is confirmed with no usable location.
const LOCATION_PROMPT: &str =
    "I still need to know where you are. Please share or type your location.";

/// What the session reports to its caller (the dialog UI).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A message (user or assistant) was appended to the transcript.
    Message(Message),
    /// The live, unfinalized speech text changed.
    TranscriptChanged(String),
    /// A classifier call went in or out of flight; disable input while true.
    Processing(bool),
    PhaseChanged(Phase),
    /// A category cleared the threshold; confirmation is being requested.
    CategoryDetected(DetectedCategory),
    /// The dispatch backend persisted the case.
    CaseCreated { id: String },
    /// One-shot user-facing notification (capability/device problems).
    Notice(String),
    /// All resources released; the session is finished.
    Closed,
}

/// The session aggregate and its state machine.
pub struct ConversationSession {
    config: AssistConfig,
    classifier: Arc<dyn Classifier>,
    dispatch: Arc<dyn DispatchBackend>,

    messages: Vec<Message>,
    phase: Phase,
    live_transcript: String,
    pending_category: Option<DetectedCategory>,
    location: Option<Location>,
    is_processing: bool,
    closed: bool,

    // Device resources, owned exclusively by the session.
    monitor: Option<AudioLevelMonitor>,
    recognition: Option<SpeechRecognitionController>,
    playback: Option<SpeechPlayback>,
    tts: Option<Arc<dyn SpeechSynthesizer>>,

    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ConversationSession {
    /// Create a session in `Chat` with no device resources attached.
    pub fn new(
        config: AssistConfig,
        classifier: Arc<dyn Classifier>,
        dispatch: Arc<dyn DispatchBackend>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            classifier,
            dispatch,
            messages: Vec::new(),
            phase: Phase::Chat,
            live_transcript: String::new(),
            pending_category: None,
            location: None,
            is_processing: false,
            closed: false,
            monitor: None,
            recognition: None,
            playback: None,
            tts: None,
            event_tx,
        };
        (session, event_rx)
    }

    /// Attach the microphone level monitor.
    pub fn with_level_monitor(mut self, monitor: AudioLevelMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Attach the recognition controller.
    pub fn with_recognition(mut self, controller: SpeechRecognitionController) -> Self {
        self.recognition = Some(controller);
        self
    }

    /// Attach narration playback and its synthesizer.
    pub fn with_voice(mut self, playback: SpeechPlayback, tts: Arc<dyn SpeechSynthesizer>) -> Self {
        self.playback = Some(playback);
        self.tts = Some(tts);
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = Some(location);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn live_transcript(&self) -> &str {
        &self.live_transcript
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn detected_category(&self) -> Option<&DetectedCategory> {
        self.pending_category.as_ref()
    }

    pub fn is_listening(&self) -> bool {
        self.recognition
            .as_ref()
            .map(|c| c.is_listening())
            .unwrap_or(false)
    }

    /// Current microphone amplitude (0..~2), 0.0 with no monitor attached.
    pub fn audio_level(&self) -> f32 {
        self.monitor.as_ref().map(|m| m.level()).unwrap_or(0.0)
    }

    /// One user turn, typed or promoted from a final transcript.
    ///
    /// Empty text is a documented no-op. A turn is refused while a classifier
    /// call is in flight and outside the `Chat` phase. A classifier failure
    /// appends an apology and keeps the transcript for a retry.
    pub async fn handle_user_text(&mut self, text: &str) -> VoiceResult<()> {
        if self.closed {
            debug!("turn ignored: session closed");
            return Ok(());
        }
        let text = text.trim();
        if text.is_empty() {
            // Nothing to process; matches the empty-final-transcript behavior.
            return Ok(());
        }
        if self.phase != Phase::Chat {
            debug!("turn ignored outside chat phase");
            return Ok(());
        }
        if self.is_processing {
            debug!("turn refused: a classifier call is already in flight");
            return Ok(());
        }

        let message = Message::user(text);
        self.emit(SessionEvent::Message(message.clone()))?;
        self.messages.push(message);

        self.is_processing = true;
        self.emit(SessionEvent::Processing(true))?;
        let address = self
            .location
            .as_ref()
            .map(Location::display_string)
            .unwrap_or_default();
        let result = self.classifier.classify(&self.messages, &address).await;
        self.is_processing = false;
        self.emit(SessionEvent::Processing(false))?;

        match result {
            Err(e) => {
                warn!("classifier call failed: {}", e);
                self.append_assistant(CLASSIFIER_APOLOGY)?;
            }
            Ok(reply) => {
                self.append_assistant(&reply.assistant_response)?;
                if let Some(category) = reply.detected_category {
                    if category.confidence > self.config.confidence_threshold {
                        info!(
                            "category '{}' detected at {:.2}, requesting confirmation",
                            category.name, category.confidence
                        );
                        self.pending_category = Some(category.clone());
                        self.set_phase(Phase::Confirmation)?;
                        self.emit(SessionEvent::CategoryDetected(category))?;
                    } else {
                        debug!(
                            "category '{}' at {:.2} does not clear the threshold",
                            category.name, category.confidence
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Feed one recognition event into the session.
    pub async fn handle_recognition_event(&mut self, event: RecognitionEvent) -> VoiceResult<()> {
        match event {
            RecognitionEvent::Interim(text) => {
                self.live_transcript = text.clone();
                self.emit(SessionEvent::TranscriptChanged(text))?;
            }
            RecognitionEvent::Final(text) => {
                self.live_transcript.clear();
                self.emit(SessionEvent::TranscriptChanged(String::new()))?;
                self.handle_user_text(&text).await?;
            }
            RecognitionEvent::Error(kind) if kind.is_silent() => {
                debug!("recognition ended silently: {:?}", kind);
            }
            RecognitionEvent::Error(kind) => {
                warn!("recognition failed: {:?}", kind);
                let notice = match kind {
                    RecognitionErrorKind::Device(_) => {
                        "Microphone problem - please try again or type instead."
                    }
                    _ => "Speech recognition failed - please try again or type instead.",
                };
                self.emit(SessionEvent::Notice(notice.to_string()))?;
            }
            RecognitionEvent::Ended => {}
        }
        Ok(())
    }

    /// Begin a listening turn. Narration stops first: only one voice channel
    /// direction is active at a time. Failures surface as one notice and
    /// leave typed input usable.
    pub fn start_listening(&mut self) -> VoiceResult<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(ref playback) = self.playback {
            playback.stop();
        }
        let result = match self.recognition.as_mut() {
            Some(controller) => controller.start_turn(),
            None => Err(VoiceError::CapabilityUnavailable(
                "no recognition engine attached".to_string(),
            )),
        };
        if let Err(ref e) = result {
            self.emit(SessionEvent::Notice(listening_notice(e)))?;
        }
        result
    }

    /// Force-end the current listening turn. Safe without one.
    pub fn stop_listening(&mut self) {
        if let Some(controller) = self.recognition.as_mut() {
            controller.stop_turn();
        }
    }

    /// Drive one full listening turn: pump recognition events until the turn
    /// ends (final transcript, error, or stop).
    pub async fn run_listening_turn(&mut self) -> VoiceResult<()> {
        loop {
            let event = match self.recognition.as_mut() {
                Some(controller) => controller.next_event().await,
                None => return Ok(()),
            };
            let event = match event {
                Some(ev) => ev,
                None => return Ok(()),
            };
            let turn_over = matches!(
                event,
                RecognitionEvent::Final(_) | RecognitionEvent::Error(_) | RecognitionEvent::Ended
            );
            self.handle_recognition_event(event).await?;
            if turn_over {
                return Ok(());
            }
        }
    }

    /// The user accepted the detected category: narrate the confirmation
    /// phrase, submit the case once, and either report the created id and
    /// close, or fall back to `Chat` with an apology.
    pub async fn confirm_category(&mut self) -> VoiceResult<Option<String>> {
        if self.closed || self.phase != Phase::Confirmation {
            debug!("confirm ignored outside confirmation phase");
            return Ok(None);
        }
        let category = match self.pending_category.take() {
            Some(c) => c,
            None => {
                warn!("confirmation phase without a pending category");
                self.set_phase(Phase::Chat)?;
                return Ok(None);
            }
        };
        let location = match self.location.clone() {
            Some(l) => l,
            None => {
                // Location gates broadcasting, never conversing.
                self.set_phase(Phase::Chat)?;
                self.append_assistant(LOCATION_PROMPT)?;
                return Ok(None);
            }
        };

        self.set_phase(Phase::Broadcasting)?;
        self.narrate(CONFIRM_PHRASE);

        let case = EmergencyCase {
            category_id: category.id.clone(),
            category_name: category.name.clone(),
            service_id: self.config.service_id.clone(),
            description: transcript_text(&self.messages),
            lat: location.lat,
            lng: location.lng,
            address: location.display_string(),
        };

        match self.dispatch.submit(&case).await {
            Ok(receipt) => {
                info!("🚨 case {} created, closing session", receipt.id);
                self.emit(SessionEvent::CaseCreated {
                    id: receipt.id.clone(),
                })?;
                // Let the confirmation narration finish before teardown.
                tokio::time::sleep(Duration::from_millis(self.config.close_delay_ms)).await;
                self.close();
                Ok(Some(receipt.id))
            }
            Err(e) => {
                warn!("broadcast failed, returning to chat: {}", e);
                self.set_phase(Phase::Chat)?;
                self.append_assistant(BROADCAST_APOLOGY)?;
                Ok(None)
            }
        }
    }

    /// The user declined the detected category: back to chat, transcript
    /// intact, with a prompt for more detail.
    pub async fn decline_category(&mut self) -> VoiceResult<()> {
        if self.closed || self.phase != Phase::Confirmation {
            return Ok(());
        }
        self.pending_category = None;
        self.set_phase(Phase::Chat)?;
        self.append_assistant(DECLINE_PROMPT)?;
        Ok(())
    }

    /// Full teardown. Idempotent and safe from every exit path: recognition
    /// callbacks detach before the engine stops, then the microphone stream,
    /// then narration.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(controller) = self.recognition.as_mut() {
            controller.stop_turn();
        }
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.close();
        }
        if let Some(playback) = self.playback.as_mut() {
            playback.close();
        }
        self.live_transcript.clear();
        let _ = self.event_tx.send(SessionEvent::Closed);
        info!("session closed");
    }

    fn append_assistant(&mut self, text: &str) -> VoiceResult<()> {
        let message = Message::assistant(text);
        self.emit(SessionEvent::Message(message.clone()))?;
        self.messages.push(message);
        self.narrate(text);
        Ok(())
    }

    fn narrate(&self, text: &str) {
        if let (Some(playback), Some(tts)) = (self.playback.as_ref(), self.tts.as_ref()) {
            if let Err(e) = playback.speak(text, Arc::clone(tts)) {
                warn!("narration failed: {}", e);
            }
        }
    }

    fn set_phase(&mut self, phase: Phase) -> VoiceResult<()> {
        if self.phase != phase {
            self.phase = phase;
            self.emit(SessionEvent::PhaseChanged(phase))?;
        }
        Ok(())
    }

    fn emit(&self, event: SessionEvent) -> VoiceResult<()> {
        self.event_tx
            .send(event)
            .map_err(|e| VoiceError::ChannelSend(e.to_string()))
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn listening_notice(error: &VoiceError) -> String {
    match error {
        VoiceError::CapabilityUnavailable(_) => {
            "Voice input is not available on this device. You can type instead.".to_string()
        }
        VoiceError::PermissionDenied(_) | VoiceError::AudioDevice(_) => {
            "Microphone unavailable. Check permissions, or type instead.".to_string()
        }
        _ => "Could not start listening. Please try again or type instead.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mayday_core::{RecordingDispatch, ScriptedClassifier};

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn session() -> (
        ConversationSession,
        mpsc::UnboundedReceiver<SessionEvent>,
        Arc<ScriptedClassifier>,
        Arc<RecordingDispatch>,
    ) {
        let classifier = Arc::new(ScriptedClassifier::new());
        let dispatch = Arc::new(RecordingDispatch::new());
        let config = AssistConfig {
            close_delay_ms: 0,
            ..Default::default()
        };
        let (session, rx) = ConversationSession::new(
            config,
            Arc::clone(&classifier) as Arc<dyn Classifier>,
            Arc::clone(&dispatch) as Arc<dyn DispatchBackend>,
        );
        (session, rx, classifier, dispatch)
    }

    #[tokio::test]
    async fn empty_text_is_a_no_op() {
        let (mut s, mut rx, classifier, _) = session();
        s.handle_user_text("   ").await.unwrap();
        assert!(s.messages().is_empty());
        assert!(classifier.calls().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn classifier_sees_history_and_address() {
        let (mut s, _rx, classifier, _) = session();
        s.set_location(Location::new(52.52, 13.405).with_address("Alexanderplatz 1"));
        classifier.push_reply("Tell me more.");
        s.handle_user_text("something happened").await.unwrap();

        assert_eq!(classifier.calls(), vec![(1, "Alexanderplatz 1".to_string())]);
        // User turn plus assistant reply.
        assert_eq!(s.messages().len(), 2);
        assert_eq!(s.phase(), Phase::Chat);
    }

    #[tokio::test]
    async fn threshold_is_strictly_greater() {
        let (mut s, _rx, classifier, _) = session();
        classifier.push_detection(
            "That sounds serious.",
            DetectedCategory {
                id: "flood-2".into(),
                name: "Flood".into(),
                confidence: 0.8,
            },
        );
        s.handle_user_text("water is rising").await.unwrap();
        // Exactly 0.8 does not transition.
        assert_eq!(s.phase(), Phase::Chat);
        assert!(s.detected_category().is_none());
    }

    #[tokio::test]
    async fn classifier_failure_appends_apology_and_allows_retry() {
        let (mut s, _rx, classifier, _) = session();
        classifier.push_failure("gateway timeout");
        classifier.push_reply("Got it this time.");

        s.handle_user_text("help me").await.unwrap();
        assert_eq!(s.messages().len(), 2);
        assert_eq!(s.messages()[1].content, CLASSIFIER_APOLOGY);
        assert!(!s.is_processing());

        // The transcript survived; the retry includes it all.
        s.handle_user_text("are you there?").await.unwrap();
        assert_eq!(classifier.calls().last().unwrap().0, 3);
    }

    #[tokio::test]
    async fn decline_returns_to_chat_with_prompt() {
        let (mut s, _rx, classifier, _) = session();
        classifier.push_detection(
            "I think there's a fire.",
            DetectedCategory {
                id: "fire-1".into(),
                name: "Fire".into(),
                confidence: 0.95,
            },
        );
        s.handle_user_text("smoke everywhere").await.unwrap();
        assert_eq!(s.phase(), Phase::Confirmation);

        s.decline_category().await.unwrap();
        assert_eq!(s.phase(), Phase::Chat);
        assert!(s.detected_category().is_none());
        // Prior transcript plus the new prompt.
        assert_eq!(s.messages().len(), 3);
        assert_eq!(s.messages()[2].content, DECLINE_PROMPT);
    }

    #[tokio::test]
    async fn confirm_without_location_asks_for_one() {
        let (mut s, _rx, classifier, dispatch) = session();
        classifier.push_detection(
            "Understood.",
            DetectedCategory {
                id: "med-3".into(),
                name: "Medical".into(),
                confidence: 0.9,
            },
        );
        s.handle_user_text("someone collapsed").await.unwrap();
        assert_eq!(s.phase(), Phase::Confirmation);

        let id = s.confirm_category().await.unwrap();
        assert!(id.is_none());
        assert!(dispatch.submissions().is_empty());
        assert_eq!(s.phase(), Phase::Chat);
        assert_eq!(s.messages().last().unwrap().content, LOCATION_PROMPT);
    }

    #[tokio::test]
    async fn double_close_is_safe() {
        let (mut s, mut rx, _, _) = session();
        s.close();
        s.close();
        let closed = drain(&mut rx)
            .iter()
            .filter(|e| matches!(e, SessionEvent::Closed))
            .count();
        assert_eq!(closed, 1);
        assert!(s.is_closed());
    }

    #[tokio::test]
    async fn turns_after_close_are_ignored() {
        let (mut s, _rx, classifier, _) = session();
        s.close();
        s.handle_user_text("anyone?").await.unwrap();
        assert!(classifier.calls().is_empty());
        assert!(s.messages().is_empty());
    }
}
