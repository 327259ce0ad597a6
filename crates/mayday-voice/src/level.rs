//! **Audio level monitor** — owns the microphone stream for the session.
//!
//! Computes a running amplitude metric (0..~2) from the live input for UI
//! feedback, and fans the same chunks out to at most one recognition tap.
//! `close()` is idempotent: safe to call twice, or before capture ever
//! produced a sample. Holds the OS input resource until closed.

use crate::audio::{rms, AudioCapture, AudioChunk, AudioConfig};
use crate::error::VoiceResult;
use cpal::Stream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// RMS is quiet for normal speech; scale up and clamp to the 0..2 meter range.
fn scaled_level(raw_rms: f32) -> f32 {
    (raw_rms * 4.0).min(2.0)
}

struct MonitorShared {
    level_tx: watch::Sender<f32>,
    tap: Mutex<Option<mpsc::UnboundedSender<AudioChunk>>>,
}

impl MonitorShared {
    fn tap_slot(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<AudioChunk>>> {
        match self.tap.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs on the audio callback thread: meter the chunk, forward it to the
    /// recognition tap if one is attached.
    fn publish_chunk(&self, chunk: AudioChunk) {
        let _ = self.level_tx.send(scaled_level(rms(&chunk.samples)));

        let mut slot = self.tap_slot();
        if let Some(ref tx) = *slot {
            if tx.send(chunk).is_err() {
                // Receiver went away (turn ended); drop the stale tap.
                *slot = None;
            }
        }
    }
}

/// Handle the recognizer uses to attach to the session's microphone stream.
///
/// Attaching always replaces any previous tap, so a stale consumer can never
/// keep receiving after a new turn starts.
#[derive(Clone)]
pub struct MicTap {
    shared: Arc<MonitorShared>,
}

impl MicTap {
    /// Start receiving chunks. Any previously attached receiver is cut off.
    pub fn attach(&self) -> mpsc::UnboundedReceiver<AudioChunk> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.tap_slot() = Some(tx);
        debug!("mic tap attached");
        rx
    }

    pub fn detach(&self) {
        *self.shared.tap_slot() = None;
        debug!("mic tap detached");
    }
}

/// Owns the microphone stream; publishes amplitude on a watch channel.
pub struct AudioLevelMonitor {
    stream: Option<Stream>,
    shared: Arc<MonitorShared>,
    level_rx: watch::Receiver<f32>,
}

impl AudioLevelMonitor {
    /// Open the default input device and start metering.
    ///
    /// Permission denial or a missing device surfaces as one
    /// `VoiceError::AudioDevice`; nothing is left half-open.
    pub fn open(config: AudioConfig) -> VoiceResult<Self> {
        let (level_tx, level_rx) = watch::channel(0.0f32);
        let shared = Arc::new(MonitorShared {
            level_tx,
            tap: Mutex::new(None),
        });

        let capture = AudioCapture::new(config.clone())?;
        let cb_shared = Arc::clone(&shared);
        let chunk_size = config.chunk_size;
        let mut buffer: Vec<f32> = Vec::with_capacity(chunk_size);

        let stream = capture.start(move |data| {
            for &sample in data {
                buffer.push(sample);
                if buffer.len() >= chunk_size {
                    cb_shared.publish_chunk(AudioChunk {
                        samples: std::mem::replace(&mut buffer, Vec::with_capacity(chunk_size)),
                        timestamp: Instant::now(),
                    });
                }
            }
        })?;

        info!("🎤 level monitor open ({} sample chunks)", chunk_size);
        Ok(Self {
            stream: Some(stream),
            shared,
            level_rx,
        })
    }

    /// Current amplitude (0..~2).
    pub fn level(&self) -> f32 {
        *self.level_rx.borrow()
    }

    /// Watch receiver for UI polling.
    pub fn level_rx(&self) -> watch::Receiver<f32> {
        self.level_rx.clone()
    }

    /// Tap handle for the recognition engine. Cheap to clone.
    pub fn mic_tap(&self) -> MicTap {
        MicTap {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Release the input stream and zero the meter. Idempotent: calling this
    /// twice, or on a monitor that never opened a tap, does nothing further.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("level monitor closed");
        }
        *self.shared.tap_slot() = None;
        let _ = self.shared.level_tx.send(0.0);
    }
}

impl Drop for AudioLevelMonitor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> (Arc<MonitorShared>, watch::Receiver<f32>) {
        let (level_tx, level_rx) = watch::channel(0.0f32);
        (
            Arc::new(MonitorShared {
                level_tx,
                tap: Mutex::new(None),
            }),
            level_rx,
        )
    }

    fn chunk(value: f32) -> AudioChunk {
        AudioChunk {
            samples: vec![value; 480],
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn scaled_level_clamps_to_two() {
        assert_eq!(scaled_level(0.0), 0.0);
        assert!(scaled_level(0.1) > 0.0);
        assert_eq!(scaled_level(10.0), 2.0);
    }

    #[test]
    fn publish_updates_meter_and_tap() {
        let (shared, level_rx) = shared();
        let tap = MicTap {
            shared: Arc::clone(&shared),
        };
        let mut rx = tap.attach();

        shared.publish_chunk(chunk(0.5));
        assert!(*level_rx.borrow() > 0.0);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.samples.len(), 480);
    }

    #[test]
    fn attach_replaces_previous_tap() {
        let (shared, _level_rx) = shared();
        let tap = MicTap {
            shared: Arc::clone(&shared),
        };
        let mut first = tap.attach();
        let mut second = tap.attach();

        shared.publish_chunk(chunk(0.2));

        // Old receiver is cut off; only the new one sees chunks.
        assert!(first.try_recv().is_err());
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn detach_silences_tap() {
        let (shared, _level_rx) = shared();
        let tap = MicTap {
            shared: Arc::clone(&shared),
        };
        let mut rx = tap.attach();
        tap.detach();

        shared.publish_chunk(chunk(0.2));
        // Sender dropped: channel reports closed, not a pending chunk.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publish_with_dead_receiver_clears_slot() {
        let (shared, _level_rx) = shared();
        let tap = MicTap {
            shared: Arc::clone(&shared),
        };
        let rx = tap.attach();
        drop(rx);

        shared.publish_chunk(chunk(0.2));
        assert!(shared.tap_slot().is_none());
    }
}
