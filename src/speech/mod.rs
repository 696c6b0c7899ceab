//! Voice capture and transcription capabilities
//!
//! This module provides:
//! - `AudioCapture` / `Transcriber` traits with explicit start and stop
//! - `Transcript`, the (final, interim) text pair
//! - `VoiceSession`, which runs one capture and one transcriber together

mod session;
mod transcript;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use session::{Recording, VoiceSession};
pub use transcript::{Transcript, TranscriptEvent};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpeechError {
    #[error("audio capture unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("transcriber failed: {0}")]
    Transcriber(String),
    #[error("voice session is not running")]
    NotRunning,
    #[error("voice session is already running")]
    AlreadyRunning,
}

/// Recorded audio as produced by the capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl AudioClip {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Audio input device
#[async_trait]
pub trait AudioCapture: Send {
    async fn start(&mut self) -> Result<(), SpeechError>;

    /// Stop recording and hand back everything captured since `start`
    async fn stop(&mut self) -> Result<AudioClip, SpeechError>;
}

/// Speech recognizer
#[async_trait]
pub trait Transcriber: Send {
    /// Start recognizing; results arrive on the returned receiver
    async fn start(&mut self, language: &str) -> Result<mpsc::Receiver<TranscriptEvent>, SpeechError>;

    /// Stop recognizing. Results already produced stay on the receiver.
    async fn stop(&mut self) -> Result<(), SpeechError>;
}
