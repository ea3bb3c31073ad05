//! Audio capture for voxagent.
//!
//! The session orchestrator only sees the [`Capture`] trait: start, stop and
//! a live input level. [`MicRecorder`] implements it on top of cpal, keeping
//! the (non-`Send`) input stream parked on a dedicated thread.

mod recorder;

use std::time::Duration;

use async_trait::async_trait;
pub use recorder::{MIN_DB, MicRecorder, db_fs, level_from_db};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// generic anyhow error
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    /// No recording device available
    #[error("no input device available")]
    NoInputDevice,
    /// Sample format not supported
    #[error("sample format not supported: {0}")]
    SampleFormatNotSupported(String),
    /// Build stream error
    #[error(transparent)]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("the audio thread is no longer running")]
    ThreadGone,
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// A finished recording.
#[derive(Debug, Clone)]
pub struct AudioClip {
    data: Vec<u8>,
    mime_type: &'static str,
    duration: Duration,
}

impl AudioClip {
    pub fn new(data: Vec<u8>, mime_type: &'static str, duration: Duration) -> Self {
        Self {
            data,
            mime_type,
            duration,
        }
    }

    /// A WAV encoded clip.
    pub fn wav(data: Vec<u8>, duration: Duration) -> Self {
        Self::new(data, "audio/wav", duration)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A black-box microphone: start, stop, and a level meter.
#[async_trait]
pub trait Capture: Send + Sync {
    /// Begin recording. Fails if no device can be opened.
    async fn start(&self) -> Result<()>;

    /// Stop recording and hand back the audio, or `None` if nothing was
    /// being recorded.
    async fn stop(&self) -> Result<Option<AudioClip>>;

    /// Instantaneous input level in `0.0..=1.0`.
    fn level(&self) -> f32;
}
