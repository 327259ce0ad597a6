//! **Speech playback** — serialized narration with an interruption stop.
//!
//! Wraps a `rodio::Sink`. Requests queue in order; `stop()` clears the queue
//! immediately and is always safe to call. A 100ms watcher publishes the
//! "is speaking" flag on a watch channel for UI polling. The session stops
//! playback before every listening turn: capture and narration are never
//! active together.

use crate::error::{VoiceError, VoiceResult};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const SPEAKING_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Turns text into audio bytes (WAV/MP3). Return an empty vec to skip
/// narration entirely.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;
}

/// Placeholder synthesizer: produces no audio, so nothing plays.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

impl SpeechSynthesizer for PlaceholderTts {
    fn synthesize(&self, _text: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Production synthesizer: OpenAI-compatible speech API.
///
/// Env: `MAYDAY_TTS_URL` (default `https://api.openai.com/v1`),
/// `MAYDAY_API_KEY` (or `OPENAI_API_KEY`), `MAYDAY_TTS_MODEL` (default
/// `tts-1`), `MAYDAY_TTS_VOICE` (default `alloy`), `MAYDAY_LANG`.
#[derive(Debug, Clone)]
pub struct HttpTts {
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    language: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpTts {
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("MAYDAY_TTS_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("MAYDAY_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                VoiceError::Config("TTS requires MAYDAY_API_KEY or OPENAI_API_KEY".to_string())
            })?;
        let model = std::env::var("MAYDAY_TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        let voice = std::env::var("MAYDAY_TTS_VOICE").unwrap_or_else(|_| "alloy".to_string());
        let language = std::env::var("MAYDAY_LANG").ok();
        Self::new(base_url, api_key, model, voice, language)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
        language: Option<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
            language,
            client,
        })
    }
}

impl SpeechSynthesizer for HttpTts {
    fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
        });
        if let Some(ref lang) = self.language {
            body["language"] = serde_json::Value::String(lang.clone());
        }
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Playback(format!(
                "TTS API error {}: {}",
                status, body
            )));
        }
        let bytes = res.bytes().map_err(|e| VoiceError::Playback(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Serialized narration playback for one session.
pub struct SpeechPlayback {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Arc<Sink>,
    speaking_rx: watch::Receiver<bool>,
    watcher_stop: Arc<AtomicBool>,
    watcher: Option<thread::JoinHandle<()>>,
    /// Bumped by `stop()`; synthesis finishing for an older epoch discards
    /// its audio instead of resurrecting interrupted narration.
    epoch: Arc<AtomicU64>,
}

impl SpeechPlayback {
    /// Open the default output device and start the speaking-state watcher.
    pub fn new() -> VoiceResult<Self> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink = Arc::new(
            Sink::try_new(&stream_handle).map_err(|e| VoiceError::Playback(e.to_string()))?,
        );

        let (speaking_tx, speaking_rx) = watch::channel(false);
        let watcher_stop = Arc::new(AtomicBool::new(false));
        let watcher_sink = Arc::clone(&sink);
        let watcher_flag = Arc::clone(&watcher_stop);
        let watcher = thread::Builder::new()
            .name("speaking-watch".to_string())
            .spawn(move || {
                while !watcher_flag.load(Ordering::Relaxed) {
                    let _ = speaking_tx.send(!watcher_sink.empty());
                    thread::sleep(SPEAKING_POLL_INTERVAL);
                }
                let _ = speaking_tx.send(false);
            })
            .map_err(|e| VoiceError::Playback(e.to_string()))?;

        info!("narration sink ready");
        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink,
            speaking_rx,
            watcher_stop,
            watcher: Some(watcher),
            epoch: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Synthesize and queue narration without blocking the event loop: the
    /// (possibly network-bound) synthesis runs on its own thread and appends
    /// to the sink when done. Audio that finishes synthesizing after a
    /// `stop()` is discarded. A synthesizer returning no audio is a no-op.
    pub fn speak(&self, text: &str, tts: Arc<dyn SpeechSynthesizer>) -> VoiceResult<()> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Ok(());
        }
        let sink = Arc::clone(&self.sink);
        let epoch = Arc::clone(&self.epoch);
        let started_at = epoch.load(Ordering::Acquire);
        thread::Builder::new()
            .name("narration-synth".to_string())
            .spawn(move || match tts.synthesize(&text) {
                Ok(bytes) if !bytes.is_empty() => {
                    if epoch.load(Ordering::Acquire) != started_at {
                        debug!("narration discarded: interrupted during synthesis");
                        return;
                    }
                    match rodio::Decoder::new(Cursor::new(bytes)) {
                        Ok(source) => sink.append(source.convert_samples::<f32>()),
                        Err(e) => warn!("narration decode failed: {}", e),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("narration synthesis failed: {}", e),
            })
            .map_err(|e| VoiceError::Playback(e.to_string()))?;
        Ok(())
    }

    /// Queue pre-synthesized audio bytes (WAV/MP3).
    pub fn play_bytes(&self, bytes: &[u8]) -> VoiceResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let source = rodio::Decoder::new(Cursor::new(bytes.to_vec()))
            .map_err(|e| VoiceError::Playback(format!("decode failed: {}", e)))?;
        self.sink.append(source.convert_samples::<f32>());
        Ok(())
    }

    /// Halt playback immediately and clear the queue. Always safe. Any
    /// synthesis still in flight is discarded when it completes.
    pub fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.sink.stop();
        debug!("narration stopped");
    }

    /// Synchronous speaking query (the watch channel lags by up to 100ms).
    pub fn is_speaking(&self) -> bool {
        !self.sink.empty()
    }

    /// Watch receiver updated every 100ms for UI state.
    pub fn speaking_rx(&self) -> watch::Receiver<bool> {
        self.speaking_rx.clone()
    }

    /// Stop playback and the watcher. Idempotent.
    pub fn close(&mut self) {
        self.stop();
        self.watcher_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.watcher.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SpeechPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_synthesizer_is_silent() {
        let out = PlaceholderTts.synthesize("hello").unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn http_tts_skips_blank_text() {
        // No network call happens for blank input, so a bogus key is fine.
        let tts = HttpTts::new("http://localhost:1", "key", "tts-1", "alloy", None).unwrap();
        assert!(tts.synthesize("   ").unwrap().is_empty());
    }
}
