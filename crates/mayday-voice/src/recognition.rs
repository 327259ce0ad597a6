//! **Speech recognition** — engine seam, lifecycle controller, and the
//! microphone-backed turn recognizer.
//!
//! The controller owns exactly one engine and guarantees the lifecycle
//! invariants: starting always disposes the previous run first, and stopping
//! detaches the event channel *before* the engine's stop primitive runs, so
//! the benign shutdown error of a forced stop can never reach the user.
//! One activation is one push-to-talk turn: a final transcript (or an engine
//! error) ends it.

use crate::error::{VoiceError, VoiceResult};
use crate::level::MicTap;
use crate::stt::SttBackend;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Events delivered by a recognition engine during one listening turn.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// In-progress guess; updates the live transcript, never the message list.
    Interim(String),
    /// Completed transcript; ends the turn.
    Final(String),
    /// Engine fault. Silent kinds end the turn without any user-visible error.
    Error(RecognitionErrorKind),
    /// The engine finished on its own (end of stream or after a final result).
    Ended,
}

/// Classification of engine faults.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionErrorKind {
    /// Nothing was said. A clean empty turn, not an error to report.
    NoSpeech,
    /// The engine was stopped deliberately mid-turn.
    Aborted,
    /// Microphone/device fault.
    Device(String),
    /// Any other engine fault; surfaces one notification.
    Engine(String),
}

impl RecognitionErrorKind {
    /// Silent-by-design conditions must never generate user-visible errors.
    pub fn is_silent(&self) -> bool {
        matches!(self, RecognitionErrorKind::NoSpeech | RecognitionErrorKind::Aborted)
    }
}

/// A speech-to-text engine instance factory. `start` begins one listening
/// turn and yields its event stream; `stop` force-ends the current turn and
/// must be safe to call at any time, repeatedly.
pub trait RecognitionEngine: Send {
    fn start(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<RecognitionEvent>>;
    fn stop(&mut self);
}

/// Controller lifecycle: `Idle → Starting → Listening → Ending → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionState {
    Idle,
    Starting,
    Listening,
    Ending,
}

/// Owns the engine for a session and enforces the lifecycle invariants.
pub struct SpeechRecognitionController {
    engine: Box<dyn RecognitionEngine>,
    state: RecognitionState,
    events: Option<mpsc::UnboundedReceiver<RecognitionEvent>>,
}

impl SpeechRecognitionController {
    pub fn new(engine: Box<dyn RecognitionEngine>) -> Self {
        Self {
            engine,
            state: RecognitionState::Idle,
            events: None,
        }
    }

    pub fn state(&self) -> RecognitionState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == RecognitionState::Listening
    }

    /// Begin a listening turn. Any previous turn is force-stopped first, so
    /// at most one engine run is ever active.
    pub fn start_turn(&mut self) -> VoiceResult<()> {
        self.stop_turn();
        self.state = RecognitionState::Starting;
        match self.engine.start() {
            Ok(rx) => {
                self.events = Some(rx);
                self.state = RecognitionState::Listening;
                debug!("recognition turn started");
                Ok(())
            }
            Err(e) => {
                self.state = RecognitionState::Idle;
                Err(e)
            }
        }
    }

    /// Force-stop the current turn. Idempotent. The event channel is dropped
    /// *before* the engine stop primitive runs: whatever the engine emits
    /// while shutting down has nowhere to land.
    pub fn stop_turn(&mut self) {
        if self.events.is_none() && self.state == RecognitionState::Idle {
            return;
        }
        self.state = RecognitionState::Ending;
        self.events = None;
        self.engine.stop();
        self.state = RecognitionState::Idle;
    }

    /// Next event of the active turn, or `None` when no turn is active.
    /// A `Final`, `Error`, or `Ended` event closes the turn before being
    /// returned.
    pub async fn next_event(&mut self) -> Option<RecognitionEvent> {
        let event = match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => return None,
        };
        let turn_over = matches!(
            event,
            None | Some(RecognitionEvent::Final(_))
                | Some(RecognitionEvent::Error(_))
                | Some(RecognitionEvent::Ended)
        );
        if turn_over {
            self.stop_turn();
        }
        event
    }
}

/// Endpointing parameters for the microphone-backed recognizer.
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// Must be 8000, 16000, 32000, or 48000 Hz (VAD requirement).
    pub sample_rate: u32,
    /// VAD aggressiveness 0-3.
    pub vad_mode: u8,
    /// Silence after speech that commits the turn (default 800ms).
    pub gap_ms: u64,
    /// Shorter speech than this is a no-speech turn (default 200ms).
    pub min_speech_ms: u64,
    /// Auto-commit bound for one turn (default 30s).
    pub max_turn_ms: u64,
    /// Give up when nothing is said at all (default 8s).
    pub no_speech_timeout_ms: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            vad_mode: 2,
            gap_ms: 800,
            min_speech_ms: 200,
            max_turn_ms: 30_000,
            no_speech_timeout_ms: 8_000,
        }
    }
}

fn vad_rate(sample_rate: u32) -> Option<SampleRate> {
    match sample_rate {
        8000 => Some(SampleRate::Rate8kHz),
        16000 => Some(SampleRate::Rate16kHz),
        32000 => Some(SampleRate::Rate32kHz),
        48000 => Some(SampleRate::Rate48kHz),
        _ => None,
    }
}

fn vad_mode(mode: u8) -> VadMode {
    match mode {
        0 => VadMode::Quality,
        1 => VadMode::LowBitrate,
        2 => VadMode::Aggressive,
        _ => VadMode::VeryAggressive,
    }
}

/// Microphone-backed engine: taps the session's input stream, endpoints a
/// turn with VAD (commit after a silence gap), and transcribes the committed
/// PCM with an [`SttBackend`].
pub struct TurnRecognizer {
    config: RecognizerConfig,
    tap: MicTap,
    stt: Arc<dyn SttBackend>,
    stop_flag: Option<Arc<AtomicBool>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl TurnRecognizer {
    pub fn new(tap: MicTap, stt: Arc<dyn SttBackend>, config: RecognizerConfig) -> VoiceResult<Self> {
        if vad_rate(config.sample_rate).is_none() {
            return Err(VoiceError::Config(format!(
                "VAD supports 8000/16000/32000/48000 Hz, got {}",
                config.sample_rate
            )));
        }
        Ok(Self {
            config,
            tap,
            stt,
            stop_flag: None,
            worker: None,
        })
    }

    /// Build with the production STT backend. Fails fast with
    /// `CapabilityUnavailable` when no engine is configured, so callers never
    /// attempt to start a turn that cannot succeed.
    pub fn from_env(tap: MicTap) -> VoiceResult<Self> {
        let stt = crate::stt::HttpStt::from_env().map_err(|e| {
            VoiceError::CapabilityUnavailable(format!("no speech engine configured: {}", e))
        })?;
        Self::new(tap, Arc::new(stt), RecognizerConfig::default())
    }
}

impl RecognitionEngine for TurnRecognizer {
    fn start(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<RecognitionEvent>> {
        self.stop();
        let chunks = self.tap.attach();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));

        let worker_stop = Arc::clone(&stop);
        let stt = Arc::clone(&self.stt);
        let config = self.config.clone();
        let worker = thread::Builder::new()
            .name("turn-endpointing".to_string())
            .spawn(move || run_endpointing(chunks, event_tx, stt, config, worker_stop))
            .map_err(|e| VoiceError::Recognition(e.to_string()))?;

        self.stop_flag = Some(stop);
        self.worker = Some(worker);
        info!("listening (gap commit, one turn per activation)");
        Ok(event_rx)
    }

    fn stop(&mut self) {
        if let Some(flag) = self.stop_flag.take() {
            flag.store(true, Ordering::Relaxed);
        }
        // Detaching closes the chunk channel; the worker unblocks and exits.
        // A worker mid-transcription finishes in the background and its result
        // is discarded (the event receiver is already gone).
        self.tap.detach();
        self.worker.take();
    }
}

impl Drop for TurnRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}

enum TurnOutcome {
    Aborted,
    NoSpeech,
    Commit,
}

fn run_endpointing(
    mut chunks: mpsc::UnboundedReceiver<crate::audio::AudioChunk>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
    stt: Arc<dyn SttBackend>,
    config: RecognizerConfig,
    stop: Arc<AtomicBool>,
) {
    let rate = match vad_rate(config.sample_rate) {
        Some(r) => r,
        None => {
            let _ = events.send(RecognitionEvent::Error(RecognitionErrorKind::Engine(
                format!("unsupported sample rate {}", config.sample_rate),
            )));
            let _ = events.send(RecognitionEvent::Ended);
            return;
        }
    };
    let mut vad = Vad::new();
    vad.set_sample_rate(rate);
    vad.set_mode(vad_mode(config.vad_mode));

    let gap = Duration::from_millis(config.gap_ms);
    let min_speech = Duration::from_millis(config.min_speech_ms);
    let max_turn = Duration::from_millis(config.max_turn_ms);
    let no_speech_timeout = Duration::from_millis(config.no_speech_timeout_ms);

    let listen_start = Instant::now();
    let mut speech_start: Option<Instant> = None;
    let mut last_speech: Option<Instant> = None;
    let mut turn_pcm: Vec<f32> = Vec::new();

    let outcome = loop {
        if stop.load(Ordering::Relaxed) {
            break TurnOutcome::Aborted;
        }
        let chunk = match chunks.blocking_recv() {
            Some(c) => c,
            // Tap detached: intentional stop, stays silent.
            None => break TurnOutcome::Aborted,
        };

        let pcm16: Vec<i16> = chunk
            .samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();
        // Frames of the wrong length are rejected by the VAD; skip them.
        let is_speech = vad.is_voice_segment(&pcm16).unwrap_or(false);
        let now = Instant::now();

        match (speech_start, is_speech) {
            (None, true) => {
                debug!("speech started");
                speech_start = Some(now);
                last_speech = Some(now);
                turn_pcm.extend_from_slice(&chunk.samples);
            }
            (None, false) => {
                if now.duration_since(listen_start) >= no_speech_timeout {
                    break TurnOutcome::NoSpeech;
                }
            }
            (Some(start), true) => {
                last_speech = Some(now);
                turn_pcm.extend_from_slice(&chunk.samples);
                if now.duration_since(start) >= max_turn {
                    warn!("max turn duration reached, committing");
                    break TurnOutcome::Commit;
                }
            }
            (Some(_), false) => {
                // Keep trailing context for the transcriber.
                turn_pcm.extend_from_slice(&chunk.samples);
                if let Some(last) = last_speech {
                    if now.duration_since(last) >= gap {
                        break TurnOutcome::Commit;
                    }
                }
            }
        }
    };

    match outcome {
        TurnOutcome::Aborted => {}
        TurnOutcome::NoSpeech => {
            let _ = events.send(RecognitionEvent::Error(RecognitionErrorKind::NoSpeech));
        }
        TurnOutcome::Commit => {
            let spoken = match (speech_start, last_speech) {
                (Some(start), Some(last)) => last.duration_since(start),
                _ => Duration::ZERO,
            };
            if spoken < min_speech {
                debug!("speech too short ({:?}), empty turn", spoken);
                let _ = events.send(RecognitionEvent::Error(RecognitionErrorKind::NoSpeech));
            } else {
                match stt.transcribe(&turn_pcm, config.sample_rate) {
                    Ok(text) if !text.trim().is_empty() => {
                        let _ = events.send(RecognitionEvent::Final(text.trim().to_string()));
                    }
                    Ok(_) => {
                        let _ = events.send(RecognitionEvent::Error(RecognitionErrorKind::NoSpeech));
                    }
                    Err(e) => {
                        let _ = events.send(RecognitionEvent::Error(RecognitionErrorKind::Engine(
                            e.to_string(),
                        )));
                    }
                }
            }
        }
    }

    let _ = events.send(RecognitionEvent::Ended);
}

/// Shared counters so tests can observe an engine after it moves into the
/// controller.
#[derive(Debug, Clone, Default)]
pub struct EngineCounters {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl EngineCounters {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::Relaxed)
    }
}

/// Scripted engine for tests: each `start` replays the next queued turn.
#[derive(Default)]
pub struct ScriptedRecognizer {
    turns: VecDeque<Vec<RecognitionEvent>>,
    fail_start: Option<String>,
    counters: EngineCounters,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine that refuses to start, as on a platform with no speech
    /// capability.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            fail_start: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn push_turn(&mut self, events: Vec<RecognitionEvent>) {
        self.turns.push_back(events);
    }

    pub fn counters(&self) -> EngineCounters {
        self.counters.clone()
    }
}

impl RecognitionEngine for ScriptedRecognizer {
    fn start(&mut self) -> VoiceResult<mpsc::UnboundedReceiver<RecognitionEvent>> {
        if let Some(ref reason) = self.fail_start {
            return Err(VoiceError::CapabilityUnavailable(reason.clone()));
        }
        self.counters.starts.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(turn) = self.turns.pop_front() {
            for event in turn {
                let _ = tx.send(event);
            }
        }
        // Sender drops here; queued events stay readable, then the channel
        // reports closed.
        Ok(rx)
    }

    fn stop(&mut self) {
        self.counters.stops.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_with(turns: Vec<Vec<RecognitionEvent>>) -> (SpeechRecognitionController, EngineCounters) {
        let mut engine = ScriptedRecognizer::new();
        for t in turns {
            engine.push_turn(t);
        }
        let counters = engine.counters();
        (SpeechRecognitionController::new(Box::new(engine)), counters)
    }

    #[tokio::test]
    async fn final_transcript_ends_the_turn() {
        let (mut ctl, _) = controller_with(vec![vec![
            RecognitionEvent::Interim("fire".into()),
            RecognitionEvent::Final("fire in my kitchen".into()),
        ]]);

        ctl.start_turn().unwrap();
        assert!(ctl.is_listening());

        assert_eq!(
            ctl.next_event().await,
            Some(RecognitionEvent::Interim("fire".into()))
        );
        assert_eq!(
            ctl.next_event().await,
            Some(RecognitionEvent::Final("fire in my kitchen".into()))
        );
        // Turn is over: back to idle, no further events.
        assert_eq!(ctl.state(), RecognitionState::Idle);
        assert_eq!(ctl.next_event().await, None);
    }

    #[tokio::test]
    async fn start_stop_start_disposes_before_acquiring() {
        let (mut ctl, counters) = controller_with(vec![
            vec![RecognitionEvent::Interim("one".into())],
            vec![RecognitionEvent::Final("two".into())],
        ]);

        ctl.start_turn().unwrap();
        ctl.stop_turn();
        assert_eq!(ctl.state(), RecognitionState::Idle);
        // Nothing leaks out of the stopped turn.
        assert_eq!(ctl.next_event().await, None);

        ctl.start_turn().unwrap();
        assert_eq!(counters.starts(), 2);
        assert_eq!(
            ctl.next_event().await,
            Some(RecognitionEvent::Final("two".into()))
        );
    }

    #[tokio::test]
    async fn stop_turn_is_idempotent() {
        let (mut ctl, counters) = controller_with(vec![vec![]]);
        ctl.start_turn().unwrap();
        ctl.stop_turn();
        let stops_after_first = counters.stops();
        ctl.stop_turn();
        ctl.stop_turn();
        // Redundant stops do not reach the engine again.
        assert_eq!(counters.stops(), stops_after_first);
    }

    #[tokio::test]
    async fn unavailable_engine_fails_fast() {
        let engine = ScriptedRecognizer::unavailable("no engine on this platform");
        let mut ctl = SpeechRecognitionController::new(Box::new(engine));
        let err = ctl.start_turn().unwrap_err();
        assert!(matches!(err, VoiceError::CapabilityUnavailable(_)));
        assert_eq!(ctl.state(), RecognitionState::Idle);
        assert!(!ctl.is_listening());
    }

    #[tokio::test]
    async fn engine_error_ends_the_turn() {
        let (mut ctl, _) = controller_with(vec![vec![RecognitionEvent::Error(
            RecognitionErrorKind::Engine("decoder crashed".into()),
        )]]);
        ctl.start_turn().unwrap();
        let ev = ctl.next_event().await;
        assert!(matches!(ev, Some(RecognitionEvent::Error(RecognitionErrorKind::Engine(_)))));
        assert_eq!(ctl.state(), RecognitionState::Idle);
    }

    #[test]
    fn no_speech_and_abort_are_silent() {
        assert!(RecognitionErrorKind::NoSpeech.is_silent());
        assert!(RecognitionErrorKind::Aborted.is_silent());
        assert!(!RecognitionErrorKind::Engine("x".into()).is_silent());
        assert!(!RecognitionErrorKind::Device("x".into()).is_silent());
    }

    #[test]
    fn vad_rate_rejects_odd_sample_rates() {
        assert!(vad_rate(44_100).is_none());
        assert!(vad_rate(16_000).is_some());
    }
}
