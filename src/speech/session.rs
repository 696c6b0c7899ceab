use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use super::{AudioCapture, AudioClip, SpeechError, Transcriber, Transcript, TranscriptEvent};

/// Outcome of a stopped voice session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub clip: AudioClip,
    pub transcript: Transcript,
}

/// Runs one audio capture and one transcriber as a unit
pub struct VoiceSession<C, T> {
    capture: C,
    transcriber: T,
    language: String,
    results: Option<mpsc::Receiver<TranscriptEvent>>,
    transcript: Transcript,
    last_error: Option<String>,
    running: bool,
}

impl<C: AudioCapture, T: Transcriber> VoiceSession<C, T> {
    pub fn new(capture: C, transcriber: T, language: impl Into<String>) -> Self {
        Self {
            capture,
            transcriber,
            language: language.into(),
            results: None,
            transcript: Transcript::new(),
            last_error: None,
            running: false,
        }
    }

    /// Start capture, then transcription. Capture is stopped again if the
    /// transcriber fails to start.
    pub async fn start(&mut self) -> Result<(), SpeechError> {
        if self.running {
            return Err(SpeechError::AlreadyRunning);
        }

        self.capture.start().await?;

        let results = match self.transcriber.start(&self.language).await {
            Ok(results) => results,
            Err(e) => {
                if let Err(stop_err) = self.capture.stop().await {
                    tracing::debug!(error = %stop_err, "Failed to stop capture after transcriber error");
                }
                return Err(e);
            }
        };

        self.results = Some(results);
        self.transcript.clear();
        self.last_error = None;
        self.running = true;
        tracing::debug!(language = %self.language, "Voice session started");
        Ok(())
    }

    /// Wait for the next transcriber event and fold it into the transcript.
    ///
    /// Returns `None` once the transcriber has ended.
    pub async fn next_event(&mut self) -> Option<TranscriptEvent> {
        let event = self.results.as_mut()?.recv().await;
        match event {
            Some(event) => {
                self.record(&event);
                Some(event)
            }
            None => {
                self.results = None;
                None
            }
        }
    }

    /// Fold every event that is already available. Returns how many were applied.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Some(results) = self.results.as_mut() {
            match results.try_recv() {
                Ok(event) => {
                    self.record(&event);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.results = None,
            }
        }
        applied
    }

    /// Stop transcription and capture, returning the clip and the transcript
    pub async fn stop(&mut self) -> Result<Recording, SpeechError> {
        if !self.running {
            return Err(SpeechError::NotRunning);
        }
        self.running = false;

        if let Err(e) = self.transcriber.stop().await {
            tracing::warn!(error = %e, "Transcriber stop failed");
            self.last_error = Some(e.to_string());
        }
        self.drain();
        self.results = None;

        let clip = self.capture.stop().await?;
        tracing::debug!(bytes = clip.data.len(), "Voice session stopped");

        Ok(Recording {
            clip,
            transcript: self.transcript.clone(),
        })
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn record(&mut self, event: &TranscriptEvent) {
        match event {
            TranscriptEvent::Error(message) => {
                tracing::warn!(error = %message, "Transcriber reported an error");
                self.last_error = Some(message.clone());
            }
            TranscriptEvent::Ended => self.results = None,
            _ => {
                self.transcript.apply(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeCapture {
        unavailable: bool,
        recording: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AudioCapture for FakeCapture {
        async fn start(&mut self) -> Result<(), SpeechError> {
            if self.unavailable {
                return Err(SpeechError::CaptureUnavailable("no microphone".into()));
            }
            self.recording.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&mut self) -> Result<AudioClip, SpeechError> {
            self.recording.store(false, Ordering::SeqCst);
            Ok(AudioClip {
                mime_type: "audio/webm".into(),
                data: vec![1, 2, 3],
            })
        }
    }

    /// Emits a fixed script of events when started
    #[derive(Default)]
    struct ScriptedTranscriber {
        script: Vec<TranscriptEvent>,
        fail_start: bool,
        tx: Option<mpsc::Sender<TranscriptEvent>>,
    }

    #[async_trait]
    impl Transcriber for ScriptedTranscriber {
        async fn start(&mut self, _language: &str) -> Result<mpsc::Receiver<TranscriptEvent>, SpeechError> {
            if self.fail_start {
                return Err(SpeechError::Transcriber("not-allowed".into()));
            }
            let (tx, rx) = mpsc::channel(16);
            for event in self.script.drain(..) {
                let _ = tx.try_send(event);
            }
            self.tx = Some(tx);
            Ok(rx)
        }

        async fn stop(&mut self) -> Result<(), SpeechError> {
            self.tx = None;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_build_transcript() {
        let transcriber = ScriptedTranscriber {
            script: vec![
                TranscriptEvent::Interim("good mor".into()),
                TranscriptEvent::Final("good morning".into()),
                TranscriptEvent::Interim("teach".into()),
            ],
            ..Default::default()
        };
        let mut session = VoiceSession::new(FakeCapture::default(), transcriber, "en-US");
        session.start().await.unwrap();

        assert_eq!(session.next_event().await, Some(TranscriptEvent::Interim("good mor".into())));
        assert_eq!(session.transcript().interim_text(), "good mor");
        assert_eq!(session.drain(), 2);

        assert_eq!(session.transcript().final_text(), "good morning");
        assert_eq!(session.transcript().interim_text(), "teach");
    }

    #[tokio::test]
    async fn test_stop_returns_clip_and_transcript() {
        let transcriber = ScriptedTranscriber {
            script: vec![
                TranscriptEvent::Final("hello".into()),
                TranscriptEvent::Interim("there".into()),
            ],
            ..Default::default()
        };
        let capture = FakeCapture::default();
        let recording_flag = capture.recording.clone();
        let mut session = VoiceSession::new(capture, transcriber, "en-US");

        session.start().await.unwrap();
        assert!(recording_flag.load(Ordering::SeqCst));

        let recording = session.stop().await.unwrap();
        assert!(!recording_flag.load(Ordering::SeqCst));
        assert!(!session.is_running());
        assert_eq!(recording.clip.data, vec![1, 2, 3]);
        assert_eq!(recording.transcript.final_text(), "hello");
        assert_eq!(recording.transcript.interim_text(), "there");

        assert_eq!(session.stop().await.unwrap_err(), SpeechError::NotRunning);
    }

    #[tokio::test]
    async fn test_transcriber_failure_rolls_back_capture() {
        let capture = FakeCapture::default();
        let recording_flag = capture.recording.clone();
        let transcriber = ScriptedTranscriber {
            fail_start: true,
            ..Default::default()
        };
        let mut session = VoiceSession::new(capture, transcriber, "en-US");

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, SpeechError::Transcriber(_)));
        assert!(!recording_flag.load(Ordering::SeqCst));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_capture_unavailable() {
        let capture = FakeCapture {
            unavailable: true,
            ..Default::default()
        };
        let mut session = VoiceSession::new(capture, ScriptedTranscriber::default(), "en-US");

        assert!(matches!(
            session.start().await,
            Err(SpeechError::CaptureUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_errors_and_end_of_stream() {
        let transcriber = ScriptedTranscriber {
            script: vec![
                TranscriptEvent::Error("no-speech".into()),
                TranscriptEvent::Ended,
                TranscriptEvent::Final("ignored".into()),
            ],
            ..Default::default()
        };
        let mut session = VoiceSession::new(FakeCapture::default(), transcriber, "en-US");
        session.start().await.unwrap();

        assert_eq!(session.drain(), 2);
        assert_eq!(session.last_error(), Some("no-speech"));
        assert!(session.transcript().is_empty());
        assert_eq!(session.next_event().await, None);

        assert_eq!(session.start().await.unwrap_err(), SpeechError::AlreadyRunning);
    }
}
