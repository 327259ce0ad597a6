//! Microphone capture using CPAL.
//!
//! One input stream per session. The stream callback hands raw samples to a
//! caller-supplied handler; chunking, level metering, and fan-out to the
//! recognizer live in `level`.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use tracing::{info, warn};

/// Capture configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000, what the recognizer expects).
    pub sample_rate: u32,

    /// Number of channels (default: 1, mono).
    pub channels: u16,

    /// Chunk size in samples (default: 480 = 30ms at 16kHz, the VAD frame).
    pub chunk_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 480,
        }
    }
}

/// One VAD-frame worth of samples from the capture callback.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// f32 samples normalized to -1.0..1.0.
    pub samples: Vec<f32>,
    pub timestamp: std::time::Instant,
}

/// Root-mean-square amplitude of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Opens the default input device and builds the capture stream.
pub struct AudioCapture {
    config: AudioConfig,
    device: Device,
    stream_config: StreamConfig,
}

impl AudioCapture {
    pub fn new(config: AudioConfig) -> VoiceResult<Self> {
        let device = cpal::default_host().default_input_device().ok_or_else(|| {
            VoiceError::AudioDevice("no input device available".to_string())
        })?;

        info!(
            "microphone: {} ({}Hz, {} ch)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate,
            config.channels
        );

        // Probing the default config surfaces permission problems early,
        // before the stream build.
        let _ = device.default_input_config()?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            config,
            device,
            stream_config,
        })
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Build and start the input stream. `on_samples` runs on the audio
    /// callback thread; keep it cheap. The stream stops when dropped.
    pub fn start<F>(self, mut on_samples: F) -> VoiceResult<Stream>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                on_samples(data);
            },
            move |err| {
                warn!("audio stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        info!("audio capture started");
        Ok(stream)
    }

    /// Names of the available input devices.
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let mut names = Vec::new();
        for device in host.input_devices()? {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }
}
