//! **Speech-to-text backends** — turn committed PCM into a final transcript.
//!
//! The recognizer's endpointing thread calls these synchronously, so the
//! production backend uses a blocking HTTP client. Implement [`SttBackend`]
//! for any engine that can transcribe a 16 kHz mono turn.

use crate::error::{VoiceError, VoiceResult};

/// Converts one committed turn of PCM into text. Return an empty string when
/// nothing intelligible was said; the recognizer treats that as a clean
/// no-speech turn, never an error.
pub trait SttBackend: Send + Sync {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String>;
}

/// Encode mono f32 PCM as 16-bit WAV bytes (API upload, local playback).
pub fn pcm_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut wav = Vec::with_capacity(44 + data_len as usize);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        let quantized = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        wav.extend_from_slice(&quantized.to_le_bytes());
    }
    wav
}

/// Fixed-response backend for tests and offline demos.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    /// If set, every turn transcribes to this.
    pub response: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

impl SttBackend for PlaceholderStt {
    fn transcribe(&self, samples: &[f32], _sample_rate: u32) -> VoiceResult<String> {
        match self.response {
            Some(ref r) => Ok(r.clone()),
            None => Ok(format!("[{} samples of speech]", samples.len())),
        }
    }
}

/// Production backend: OpenAI-compatible transcription API.
///
/// Env: `MAYDAY_STT_URL` (default `https://api.openai.com/v1`),
/// `MAYDAY_API_KEY` (or `OPENAI_API_KEY`), `MAYDAY_STT_MODEL` (default
/// `whisper-1`).
#[derive(Debug, Clone)]
pub struct HttpStt {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl HttpStt {
    pub fn from_env() -> VoiceResult<Self> {
        let base_url = std::env::var("MAYDAY_STT_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("MAYDAY_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                VoiceError::Config("STT requires MAYDAY_API_KEY or OPENAI_API_KEY".to_string())
            })?;
        let model = std::env::var("MAYDAY_STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Recognition(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

impl SttBackend for HttpStt {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_to_wav(samples, sample_rate);
        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("turn.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Recognition(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| VoiceError::Recognition(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Recognition(format!(
                "STT API error {}: {}",
                status, body
            )));
        }
        let json: serde_json::Value = res
            .json()
            .map_err(|e| VoiceError::Recognition(e.to_string()))?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_is_well_formed() {
        let wav = pcm_to_wav(&[0.0; 480], 16000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[36..40], b"data");
        // 44-byte header + 2 bytes per sample.
        assert_eq!(wav.len(), 44 + 480 * 2);
        let rate = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(rate, 16000);
    }

    #[test]
    fn wav_clamps_out_of_range_samples() {
        let wav = pcm_to_wav(&[2.0, -2.0], 16000);
        let first = i16::from_le_bytes([wav[44], wav[45]]);
        let second = i16::from_le_bytes([wav[46], wav[47]]);
        assert_eq!(first, 32767);
        assert_eq!(second, -32767);
    }

    #[test]
    fn placeholder_uses_fixed_response() {
        let stt = PlaceholderStt::with_response("fire in my kitchen");
        let text = stt.transcribe(&[0.1; 480], 16000).unwrap();
        assert_eq!(text, "fire in my kitchen");
    }
}
